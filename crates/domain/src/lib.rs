//! Domain model for the order fulfillment services.
//!
//! This crate holds plain data and the rules that do not need I/O:
//! - [`Money`], exact fixed-point arithmetic for prices and totals
//! - [`Order`] and its status state machine
//! - [`Payment`] ledger rows, created either decided or as a placeholder
//! - catalog [`Product`] snapshots and signed [`StockAdjustment`]s
//! - the [`Notification`] message and the [`OrderCreatedFact`]

pub mod catalog;
pub mod error;
pub mod facts;
pub mod money;
pub mod notification;
pub mod order;
pub mod payment;
pub mod user;

pub use catalog::{Product, StockAdjustment, StockAdjustmentBatch};
pub use common::{OrderId, PaymentId, ProductId, UserId};
pub use error::DomainError;
pub use facts::{ORDER_CREATED_FACT_TYPE, ORDER_CREATED_TOPIC, OrderCreatedFact};
pub use money::{Money, MoneyError};
pub use notification::{Notification, NotificationStatus};
pub use order::{Order, OrderError, OrderItem, OrderStatus};
pub use payment::{Payment, PaymentError, PaymentStatus};
pub use user::{Role, User};
