//! Durable, topic-partitioned fact log.
//!
//! Producers publish immutable facts onto a topic; each fact receives a
//! monotonically increasing [`Offset`] within that topic. Consumers are
//! grouped by name and track a committed offset per `(topic, group)`, which
//! gives at-least-once delivery: a fact is redelivered until its offset has
//! been committed.

pub mod error;
pub mod fact;
pub mod log;
pub mod memory;
pub mod postgres;
pub mod subscriber;

pub use common::FactId;
pub use error::{EventLogError, Result};
pub use fact::{FactEnvelope, NewFact, NewFactBuilder, Offset};
pub use log::{EventLog, EventLogExt};
pub use memory::InMemoryEventLog;
pub use postgres::PostgresEventLog;
pub use subscriber::{FactHandler, HandleError, PollSummary, Subscriber};
