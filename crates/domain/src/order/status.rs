//! Order status state machine.

use serde::{Deserialize, Serialize};

/// The status of an order in its lifecycle.
///
/// Status transitions:
/// ```text
/// AwaitingPayment ──┬──► Paid
///                   ├──► PaymentFailed
///                   └──► Cancelled
/// ```
///
/// No transition is reversible. `Cancelled` is reserved: nothing in the
/// settlement flow produces it, but the conditional write accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order is persisted and waits for a payment decision.
    #[default]
    AwaitingPayment,

    /// Payment accepted and settlement applied (terminal state).
    Paid,

    /// Payment rejected (terminal state).
    PaymentFailed,

    /// Order was cancelled before payment (terminal state).
    Cancelled,
}

impl OrderStatus {
    /// Returns true if the order may move from this status to `to`.
    pub fn can_transition_to(&self, to: OrderStatus) -> bool {
        matches!(
            (self, to),
            (
                OrderStatus::AwaitingPayment,
                OrderStatus::Paid | OrderStatus::PaymentFailed | OrderStatus::Cancelled
            )
        )
    }

    /// Returns true if this is a terminal status (no further transitions possible).
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::AwaitingPayment)
    }

    /// Returns the wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
            OrderStatus::Paid => "PAID",
            OrderStatus::PaymentFailed => "PAYMENT_FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AWAITING_PAYMENT" => Ok(OrderStatus::AwaitingPayment),
            "PAID" => Ok(OrderStatus::Paid),
            "PAYMENT_FAILED" => Ok(OrderStatus::PaymentFailed),
            "CANCELLED" => Ok(OrderStatus::Cancelled),
            other => Err(format!("unknown order status: {other}")),
        }
    }
}
