//! Facts published by the order side.

use chrono::{DateTime, Utc};
use common::{OrderId, UserId};
use serde::{Deserialize, Serialize};

use crate::money::Money;
use crate::order::{Order, OrderError, OrderItem, OrderStatus};

/// Topic carrying [`OrderCreatedFact`]s.
pub const ORDER_CREATED_TOPIC: &str = "order-created";

/// Fact type tag of [`OrderCreatedFact`].
pub const ORDER_CREATED_FACT_TYPE: &str = "OrderCreated";

/// Full order snapshot published after an order is persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedFact {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub total: Money,
    pub products: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl OrderCreatedFact {
    /// Checks that the snapshot is self-consistent.
    ///
    /// Consumers call this before acting on a fact; a fact that fails is
    /// malformed and never becomes valid on redelivery.
    pub fn validate(&self) -> Result<(), OrderError> {
        if self.products.is_empty() {
            return Err(OrderError::NoItems);
        }
        if let Some(item) = self.products.iter().find(|i| i.quantity == 0) {
            return Err(OrderError::InvalidQuantity {
                product_id: item.product_id,
                quantity: 0,
            });
        }
        let expected = Order::compute_total(&self.products)?;
        if expected != self.total || !self.total.is_positive() {
            return Err(OrderError::TotalMismatch {
                expected,
                actual: self.total,
            });
        }
        Ok(())
    }
}

impl From<&Order> for OrderCreatedFact {
    fn from(order: &Order) -> Self {
        Self {
            order_id: order.id,
            user_id: order.user_id,
            total: order.total,
            products: order.items.clone(),
            status: order.status,
            created_at: order.created_at,
        }
    }
}
