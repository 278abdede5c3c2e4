use common::OrderId;
use serde::{Deserialize, Serialize};

/// Outcome carried by a notification. Wire names follow the queue contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationStatus {
    #[serde(rename = "APROVADO")]
    Approved,
    #[serde(rename = "RECUSADO")]
    Rejected,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Approved => "APROVADO",
            NotificationStatus::Rejected => "RECUSADO",
        }
    }
}

impl std::fmt::Display for NotificationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Message published to the notification queue. Not persisted here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub order_id: OrderId,
    pub status: NotificationStatus,
    pub message: String,
}

impl Notification {
    pub fn new(order_id: OrderId, status: NotificationStatus, message: impl Into<String>) -> Self {
        Self {
            order_id,
            status,
            message: message.into(),
        }
    }

    pub fn approved(order_id: OrderId) -> Self {
        Self::new(
            order_id,
            NotificationStatus::Approved,
            format!("Payment for order {order_id} was approved."),
        )
    }

    pub fn rejected(order_id: OrderId) -> Self {
        Self::new(
            order_id,
            NotificationStatus::Rejected,
            format!("Payment for order {order_id} was declined."),
        )
    }
}
