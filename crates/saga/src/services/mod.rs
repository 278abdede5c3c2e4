//! Collaborator traits with in-memory and remote implementations.
//!
//! The saga only talks to stores and brokers through these traits, so the
//! same orchestration code runs against in-memory fakes in tests and against
//! the HTTP services, PostgreSQL and the AMQP broker in production.

pub mod amqp;
pub mod catalog;
pub mod http;
pub mod notifications;
pub mod orders;
pub mod payments;
pub mod postgres;
pub mod users;

pub use amqp::AmqpNotificationQueue;
pub use catalog::{Catalog, InMemoryCatalog};
pub use http::{HttpCatalog, HttpUserDirectory};
pub use notifications::{InMemoryNotificationQueue, NotificationQueue};
pub use orders::{InMemoryOrderStore, OrderStore};
pub use payments::{InMemoryPaymentLedger, PaymentLedger};
pub use postgres::{PostgresOrderStore, PostgresPaymentLedger};
pub use users::{InMemoryUserDirectory, UserDirectory};
