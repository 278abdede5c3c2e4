//! Saga error types.

use common::OrderId;
use domain::{DomainError, MoneyError, OrderError, PaymentError};
use event_log::EventLogError;
use thiserror::Error;

use crate::state::SettlementState;

/// Errors that can occur during saga operations.
///
/// Variants map onto a small stable taxonomy exposed through [`SagaError::code`].
#[derive(Debug, Error)]
pub enum SagaError {
    /// Missing or malformed input.
    #[error("{0}")]
    Validation(String),

    /// The caller is not allowed to perform the operation.
    #[error("{0}")]
    Forbidden(String),

    /// A referenced order, product, user or payment does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The catalog reports less stock than requested.
    #[error("{0}")]
    InsufficientStock(String),

    /// The write conflicts with the current state.
    #[error("{0}")]
    Conflict(String),

    /// A collaborator call failed or timed out.
    #[error("{message}")]
    Upstream { status: Option<u16>, message: String },

    /// Payment accepted but a settlement step failed afterwards.
    #[error(
        "payment for order {order_id} was accepted but step '{step}' failed: {reason}; settlement requires reconciliation"
    )]
    InconsistentState {
        order_id: OrderId,
        step: &'static str,
        reason: String,
    },

    /// Settlement trail advanced out of order.
    #[error("Invalid settlement state: cannot move from {from} to {to}")]
    InvalidState {
        from: SettlementState,
        to: SettlementState,
    },

    /// Order rule violation.
    #[error("{0}")]
    Order(#[from] OrderError),

    /// Event log error.
    #[error("Event log error: {0}")]
    EventLog(#[from] EventLogError),

    /// Message broker error.
    #[error("Broker error: {0}")]
    Broker(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Order or payment table error.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl SagaError {
    /// Stable taxonomy label for this error.
    pub fn code(&self) -> &'static str {
        match self {
            SagaError::Validation(_) => "VALIDATION",
            SagaError::Forbidden(_) => "FORBIDDEN",
            SagaError::NotFound(_) => "NOT_FOUND",
            SagaError::InsufficientStock(_) => "INSUFFICIENT_STOCK",
            SagaError::Conflict(_) => "CONFLICT",
            SagaError::Upstream { .. } => "UPSTREAM_FAILURE",
            SagaError::InconsistentState { .. } => "INCONSISTENT_STATE",
            SagaError::Order(OrderError::InvalidStateTransition { .. }) => "CONFLICT",
            SagaError::Order(_) => "VALIDATION",
            SagaError::InvalidState { .. }
            | SagaError::EventLog(_)
            | SagaError::Broker(_)
            | SagaError::Serialization(_)
            | SagaError::Database(_) => "INTERNAL",
        }
    }

    /// Shorthand for an upstream failure without a status code (timeouts,
    /// connection errors).
    pub fn upstream(message: impl Into<String>) -> Self {
        SagaError::Upstream {
            status: None,
            message: message.into(),
        }
    }
}

impl From<DomainError> for SagaError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::Order(e) => SagaError::Order(e),
            DomainError::Payment(PaymentError::AlreadyDecided { order_id }) => SagaError::Conflict(
                format!("payment for order {order_id} was already decided"),
            ),
            DomainError::Money(e) => e.into(),
        }
    }
}

impl From<PaymentError> for SagaError {
    fn from(err: PaymentError) -> Self {
        DomainError::from(err).into()
    }
}

impl From<MoneyError> for SagaError {
    fn from(err: MoneyError) -> Self {
        SagaError::Validation(err.to_string())
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
