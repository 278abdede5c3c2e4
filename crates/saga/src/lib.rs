//! Order fulfillment saga.
//!
//! An order is created in `AWAITING_PAYMENT` after its user and products are
//! validated. A payment decision is then recorded, and the fulfillment
//! coordinator settles it:
//! 1. Adjust stock (accepted payments only)
//! 2. Update the order status to `PAID` or `PAYMENT_FAILED`
//! 3. Notify the outcome on the durable queue
//!
//! There is no compensation. An accepted payment is never reversed; a failed
//! step after acceptance is reported as an inconsistent state and the
//! remaining steps are retried by settling again.
//!
//! Payments can also be driven by order-created facts: the reconciliation
//! handler registers a pending placeholder per order, which is decided later
//! through the fact-driven entry point.

pub mod coordinator;
pub mod decision;
pub mod error;
pub mod intake;
pub mod order_fulfillment;
pub mod reconciliation;
pub mod relay;
pub mod services;
pub mod state;

pub use coordinator::{FulfillmentCoordinator, SettlementOutcome, SettlementResult};
pub use decision::{
    DecideRequest, Decision, DecisionPolicy, FixedDecision, PaymentDecisionEngine, WeightedCoin,
};
pub use error::{Result, SagaError};
pub use intake::{OrderIntake, OrderLine};
pub use order_fulfillment::{Collaborators, OrderFulfillment, PaymentOutcome};
pub use reconciliation::OrderCreatedHandler;
pub use relay::NotificationRelay;
pub use services::{
    AmqpNotificationQueue, Catalog, HttpCatalog, HttpUserDirectory, InMemoryCatalog,
    InMemoryNotificationQueue, InMemoryOrderStore, InMemoryPaymentLedger, InMemoryUserDirectory,
    NotificationQueue, OrderStore, PaymentLedger, PostgresOrderStore, PostgresPaymentLedger,
    UserDirectory,
};
pub use state::{SettlementState, SettlementTrail};
