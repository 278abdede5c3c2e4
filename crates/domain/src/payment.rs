//! Payment ledger rows.

use chrono::{DateTime, Utc};
use common::{OrderId, PaymentId};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::money::Money;

/// Errors raised by payment state changes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    /// The outcome was already recorded; it is set exactly once.
    #[error("payment for order {order_id} was already decided")]
    AlreadyDecided { order_id: OrderId },
}

/// Payment status, mirrored against the outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Placeholder created from an order-created fact; no decision yet.
    #[default]
    PendingProcess,
    Paid,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::PendingProcess => "PENDING_PROCESS",
            PaymentStatus::Paid => "PAID",
            PaymentStatus::Failed => "FAILED",
        }
    }

    fn from_outcome(accepted: bool) -> Self {
        if accepted {
            PaymentStatus::Paid
        } else {
            PaymentStatus::Failed
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING_PROCESS" => Ok(PaymentStatus::PendingProcess),
            "PAID" => Ok(PaymentStatus::Paid),
            "FAILED" => Ok(PaymentStatus::Failed),
            other => Err(format!("unknown payment status: {other}")),
        }
    }
}

/// A payment attempt for one order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: PaymentId,
    pub order_id: OrderId,
    pub method: Option<String>,
    pub value: Money,
    pub accepted: Option<bool>,
    pub status: PaymentStatus,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl Payment {
    /// An undecided row, created when an order-created fact is consumed.
    pub fn placeholder(order_id: OrderId, value: Money) -> Self {
        Self {
            id: PaymentId::new(),
            order_id,
            method: None,
            value,
            accepted: None,
            status: PaymentStatus::PendingProcess,
            created_at: Utc::now(),
            decided_at: None,
        }
    }

    /// A row whose outcome is known at creation.
    pub fn decided(
        order_id: OrderId,
        method: Option<String>,
        value: Money,
        accepted: bool,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: PaymentId::new(),
            order_id,
            method,
            value,
            accepted: Some(accepted),
            status: PaymentStatus::from_outcome(accepted),
            created_at: now,
            decided_at: Some(now),
        }
    }

    /// Records the outcome on a placeholder.
    pub fn record_decision(
        &mut self,
        method: Option<String>,
        accepted: bool,
    ) -> Result<(), PaymentError> {
        if self.is_decided() {
            return Err(PaymentError::AlreadyDecided {
                order_id: self.order_id,
            });
        }
        if method.is_some() {
            self.method = method;
        }
        self.accepted = Some(accepted);
        self.status = PaymentStatus::from_outcome(accepted);
        self.decided_at = Some(Utc::now());
        Ok(())
    }

    pub fn is_decided(&self) -> bool {
        self.accepted.is_some()
    }

    pub fn is_accepted(&self) -> bool {
        self.accepted == Some(true)
    }
}
