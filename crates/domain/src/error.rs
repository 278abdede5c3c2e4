//! Domain error types.

use thiserror::Error;

use crate::money::MoneyError;
use crate::order::OrderError;
use crate::payment::PaymentError;

/// Errors raised by domain rules.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// An order rule was violated.
    #[error("Order error: {0}")]
    Order(#[from] OrderError),

    /// A payment rule was violated.
    #[error("Payment error: {0}")]
    Payment(#[from] PaymentError),

    /// An amount could not be parsed or computed.
    #[error("Money error: {0}")]
    Money(#[from] MoneyError),
}
