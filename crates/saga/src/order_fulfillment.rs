//! Order fulfillment saga: step names and the facade wiring its components.

use std::sync::Arc;

use domain::{Order, OrderCreatedFact, OrderId, OrderStatus, Payment, UserId};
use event_log::{EventLog, Subscriber};

use crate::coordinator::{FulfillmentCoordinator, SettlementResult};
use crate::decision::{DecideRequest, Decision, DecisionPolicy, PaymentDecisionEngine};
use crate::error::{Result, SagaError};
use crate::intake::{OrderIntake, OrderLine};
use crate::reconciliation::OrderCreatedHandler;
use crate::relay::NotificationRelay;
use crate::services::{Catalog, NotificationQueue, OrderStore, PaymentLedger, UserDirectory};

/// The saga type identifier for order fulfillment.
pub const SAGA_TYPE: &str = "OrderFulfillment";

/// Step name: apply the order's stock deltas as one batch.
pub const STEP_ADJUST_STOCK: &str = "adjust_stock";

/// Step name: move the order out of `AWAITING_PAYMENT`.
pub const STEP_UPDATE_STATUS: &str = "update_status";

/// Step name: publish the outcome notification.
pub const STEP_NOTIFY: &str = "notify";

/// Stores and brokers the saga runs against.
#[derive(Clone)]
pub struct Collaborators {
    pub users: Arc<dyn UserDirectory>,
    pub catalog: Arc<dyn Catalog>,
    pub orders: Arc<dyn OrderStore>,
    pub payments: Arc<dyn PaymentLedger>,
    pub notifications: Arc<dyn NotificationQueue>,
}

/// A payment decision together with the settlement it triggered.
///
/// The decision is definitive even when `settlement` failed: an accepted
/// payment with an [`SagaError::InconsistentState`] settlement is still
/// accepted.
#[derive(Debug)]
pub struct PaymentOutcome {
    pub decision: Decision,
    pub settlement: Result<SettlementResult>,
}

impl PaymentOutcome {
    pub fn payment(&self) -> &Payment {
        self.decision.payment()
    }
}

/// Entry point for callers of the order fulfillment saga.
pub struct OrderFulfillment {
    intake: OrderIntake,
    engine: Arc<PaymentDecisionEngine>,
    coordinator: FulfillmentCoordinator,
    orders: Arc<dyn OrderStore>,
    payments: Arc<dyn PaymentLedger>,
}

impl OrderFulfillment {
    pub fn new(collaborators: Collaborators, policy: Arc<dyn DecisionPolicy>) -> Self {
        let Collaborators {
            users,
            catalog,
            orders,
            payments,
            notifications,
        } = collaborators;

        let intake = OrderIntake::new(users, Arc::clone(&catalog), Arc::clone(&orders));
        let engine = Arc::new(PaymentDecisionEngine::new(Arc::clone(&payments), policy));
        let coordinator = FulfillmentCoordinator::new(
            catalog,
            Arc::clone(&orders),
            NotificationRelay::new(notifications),
        );

        Self {
            intake,
            engine,
            coordinator,
            orders,
            payments,
        }
    }

    /// Publishes an order-created fact for every new order.
    pub fn with_fact_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.intake = self.intake.with_fact_log(log);
        self
    }

    pub fn engine(&self) -> &Arc<PaymentDecisionEngine> {
        &self.engine
    }

    /// Validates and persists a new order in `AWAITING_PAYMENT`.
    pub async fn create_order(&self, user_id: UserId, lines: Vec<OrderLine>) -> Result<Order> {
        self.intake.create_order(user_id, lines).await
    }

    pub async fn order(&self, id: OrderId) -> Result<Order> {
        self.orders
            .get(id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("Order {id} not found")))
    }

    pub async fn list_orders(&self) -> Result<Vec<Order>> {
        self.orders.list().await
    }

    /// Conditional status write; `expected` guards against a concurrent change.
    pub async fn transition_order(
        &self,
        id: OrderId,
        expected: Option<OrderStatus>,
        to: OrderStatus,
    ) -> Result<Order> {
        self.orders.transition(id, expected, to).await
    }

    pub async fn payment(&self, order_id: OrderId) -> Result<Payment> {
        self.payments
            .find_by_order(order_id)
            .await?
            .ok_or_else(|| {
                SagaError::NotFound(format!("No payment registered for order {order_id}"))
            })
    }

    /// Synchronous chain: decide the payment for an existing order, then
    /// settle it.
    ///
    /// The request value must match the order total, and an order that left
    /// `AWAITING_PAYMENT` without a decided payment is refused with CONFLICT.
    /// An order that already has a decided payment is settled again with it, which is a no-op on a
    /// terminal order and finishes an incomplete settlement otherwise.
    #[tracing::instrument(skip(self, request), fields(saga = SAGA_TYPE, order_id = ?request.order_id))]
    pub async fn decide_and_settle(&self, request: &DecideRequest) -> Result<PaymentOutcome> {
        let (order_id, value) = request.validate()?;
        let order = self.order(order_id).await?;
        if value != order.total {
            return Err(SagaError::Validation(format!(
                "Payment value {value} does not match order total {}",
                order.total
            )));
        }

        self.ensure_awaiting_payment(&order).await?;
        let decision = self.engine.decide(request).await?;
        let settlement = self.coordinator.settle(decision.payment(), &order).await;
        Ok(PaymentOutcome {
            decision,
            settlement,
        })
    }

    /// Fact-driven chain: decide the placeholder registered for `order_id`,
    /// then settle it.
    ///
    /// A placeholder that was already decided is returned as
    /// [`Decision::AlreadyRecorded`]; settling it again is a no-op unless an
    /// earlier run left steps unfinished.
    #[tracing::instrument(skip(self, method), fields(saga = SAGA_TYPE))]
    pub async fn process_and_settle(
        &self,
        order_id: OrderId,
        method: Option<String>,
    ) -> Result<PaymentOutcome> {
        let order = self.order(order_id).await?;
        self.ensure_awaiting_payment(&order).await?;
        let decision = self.engine.process(order_id, method).await?;

        let settlement = self.coordinator.settle(decision.payment(), &order).await;
        Ok(PaymentOutcome {
            decision,
            settlement,
        })
    }

    /// Refuses to decide a payment for an order that left `AWAITING_PAYMENT`
    /// without one. An order with a decided payment passes, so a repeated
    /// request still gets the recorded decision back.
    async fn ensure_awaiting_payment(&self, order: &Order) -> Result<()> {
        if order.status == OrderStatus::AwaitingPayment {
            return Ok(());
        }
        let decided = self
            .payments
            .find_by_order(order.id)
            .await?
            .is_some_and(|payment| payment.is_decided());
        if decided {
            return Ok(());
        }
        tracing::warn!(order_id = %order.id, status = %order.status, "refusing payment for an order no longer awaiting one");
        Err(SagaError::Conflict(format!(
            "Order {} is {} and no longer awaits payment",
            order.id, order.status
        )))
    }

    /// Re-runs settlement for an order whose payment is decided, finishing
    /// the steps a failed run left behind.
    #[tracing::instrument(skip(self), fields(saga = SAGA_TYPE))]
    pub async fn resume_settlement(&self, order_id: OrderId) -> Result<SettlementResult> {
        let order = self.order(order_id).await?;
        let payment = self.payment(order_id).await?;
        self.coordinator.settle(&payment, &order).await
    }

    /// Registers the pending payment for an order-created fact.
    pub async fn register_placeholder(&self, fact: &OrderCreatedFact) -> Result<(Payment, bool)> {
        self.engine.register_placeholder(fact).await
    }

    /// Builds the reconciliation subscriber for the order-created topic.
    pub fn subscriber<L>(&self, log: Arc<L>, group: impl Into<String>) -> Subscriber<L>
    where
        L: EventLog + ?Sized,
    {
        Subscriber::new(
            log,
            domain::ORDER_CREATED_TOPIC,
            group,
            Arc::new(OrderCreatedHandler::new(Arc::clone(&self.engine))),
        )
    }
}
