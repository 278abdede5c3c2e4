use chrono::{DateTime, Utc};
use common::{OrderId, ProductId, UserId};
use serde::{Deserialize, Serialize};

use super::{OrderError, OrderStatus};
use crate::catalog::StockAdjustment;
use crate::money::Money;

/// A line item on an order.
///
/// `name` and `unit_price` are snapshots taken from the catalog when the
/// order was placed; later catalog changes do not affect them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: ProductId,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl OrderItem {
    /// Creates a new order item.
    pub fn new(
        product_id: ProductId,
        name: impl Into<String>,
        quantity: u32,
        unit_price: Money,
    ) -> Self {
        Self {
            product_id,
            name: name.into(),
            quantity,
            unit_price,
        }
    }

    /// Returns unit price × quantity, exactly.
    pub fn line_total(&self) -> Result<Money, OrderError> {
        self.unit_price
            .checked_multiply(self.quantity)
            .map_err(|_| OrderError::TotalOverflow)
    }
}

/// A persisted order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Order {
    pub id: OrderId,
    pub user_id: UserId,
    pub items: Vec<OrderItem>,
    pub total: Money,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// Builds a new order awaiting payment.
    ///
    /// The total is computed once here and never recomputed.
    pub fn place(user_id: UserId, items: Vec<OrderItem>) -> Result<Self, OrderError> {
        if items.is_empty() {
            return Err(OrderError::NoItems);
        }

        for item in &items {
            if item.quantity == 0 {
                return Err(OrderError::InvalidQuantity {
                    product_id: item.product_id,
                    quantity: 0,
                });
            }
            if item.unit_price.is_negative() {
                return Err(OrderError::InvalidPrice {
                    product_id: item.product_id,
                    price: item.unit_price.to_string(),
                });
            }
        }

        let total = Self::compute_total(&items)?;

        Ok(Self {
            id: OrderId::new(),
            user_id,
            items,
            total,
            status: OrderStatus::AwaitingPayment,
            created_at: Utc::now(),
        })
    }

    /// Σ(unit price × quantity) over `items`.
    pub fn compute_total(items: &[OrderItem]) -> Result<Money, OrderError> {
        let lines = items
            .iter()
            .map(OrderItem::line_total)
            .collect::<Result<Vec<_>, _>>()?;
        Money::checked_sum(lines).map_err(|_| OrderError::TotalOverflow)
    }

    /// Moves the order to `to`, enforcing the status state machine.
    pub fn transition(&mut self, to: OrderStatus) -> Result<(), OrderError> {
        if !self.status.can_transition_to(to) {
            return Err(OrderError::InvalidStateTransition {
                from: self.status,
                to,
            });
        }
        self.status = to;
        Ok(())
    }

    /// One negative stock delta per line item.
    pub fn stock_deltas(&self) -> Vec<StockAdjustment> {
        self.items
            .iter()
            .map(|item| StockAdjustment::new(item.product_id, -i64::from(item.quantity)))
            .collect()
    }

    /// Returns the total quantity across all line items.
    pub fn total_quantity(&self) -> u64 {
        self.items.iter().map(|i| u64::from(i.quantity)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: i64, quantity: u32, price: &str) -> OrderItem {
        OrderItem::new(
            ProductId::new(id),
            format!("Product {id}"),
            quantity,
            price.parse().unwrap(),
        )
    }

    #[test]
    fn test_place_computes_exact_total() {
        let order = Order::place(UserId::new(1), vec![item(1, 3, "50.00"), item(2, 1, "0.10")])
            .unwrap();

        assert_eq!(order.total.to_string(), "150.10");
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.total_quantity(), 4);
    }

    #[test]
    fn test_place_rejects_empty_orders() {
        assert_eq!(
            Order::place(UserId::new(1), vec![]).unwrap_err(),
            OrderError::NoItems
        );
    }

    #[test]
    fn test_place_rejects_zero_quantity() {
        let err = Order::place(UserId::new(1), vec![item(7, 0, "1.00")]).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidQuantity {
                product_id: ProductId::new(7),
                quantity: 0
            }
        );
    }

    #[test]
    fn test_place_rejects_overflowing_total() {
        let huge = OrderItem::new(ProductId::new(1), "x", u32::MAX, Money::from_cents(i64::MAX));
        assert_eq!(
            Order::place(UserId::new(1), vec![huge]).unwrap_err(),
            OrderError::TotalOverflow
        );
    }

    #[test]
    fn test_transition_is_one_way() {
        let mut order = Order::place(UserId::new(1), vec![item(1, 1, "10.00")]).unwrap();

        order.transition(OrderStatus::Paid).unwrap();
        let err = order.transition(OrderStatus::PaymentFailed).unwrap_err();

        assert_eq!(
            err,
            OrderError::InvalidStateTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::PaymentFailed
            }
        );
        assert_eq!(order.status, OrderStatus::Paid);
    }

    #[test]
    fn test_stock_deltas_are_negative_quantities() {
        let order = Order::place(UserId::new(1), vec![item(1, 2, "1.00"), item(2, 5, "1.00")])
            .unwrap();

        let deltas: Vec<(i64, i64)> = order
            .stock_deltas()
            .iter()
            .map(|d| (d.product_id.as_i64(), d.delta))
            .collect();
        assert_eq!(deltas, vec![(1, -2), (2, -5)]);
    }

    #[test]
    fn test_serializes_camel_case() {
        let order = Order::place(UserId::new(3), vec![item(1, 2, "50.00")]).unwrap();
        let json = serde_json::to_value(&order).unwrap();

        assert_eq!(json["userId"], 3);
        assert_eq!(json["total"], "100.00");
        assert_eq!(json["status"], "AWAITING_PAYMENT");
        assert_eq!(json["items"][0]["unitPrice"], "50.00");
        assert_eq!(json["items"][0]["productId"], 1);
        assert!(json.get("createdAt").is_some());
    }
}
