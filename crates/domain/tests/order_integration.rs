//! Integration tests for the order model.
//!
//! These tests exercise the public API the saga relies on: exact totals,
//! the one-way status machine, stock deltas and the order-created fact.

use domain::{
    DomainError, Money, Order, OrderCreatedFact, OrderError, OrderItem, OrderStatus, Payment,
    PaymentStatus, ProductId, StockAdjustmentBatch, UserId,
};

fn item(product: i64, quantity: u32, price: &str) -> OrderItem {
    OrderItem::new(
        ProductId::new(product),
        format!("Product {product}"),
        quantity,
        price.parse().unwrap(),
    )
}

mod totals {
    use super::*;

    #[test]
    fn single_item_order_totals_exactly() {
        let order = Order::place(UserId::new(1), vec![item(1, 2, "50.00")]).unwrap();

        assert_eq!(order.total, "100.00".parse::<Money>().unwrap());
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
    }

    #[test]
    fn fractional_prices_do_not_drift() {
        // 0.1 + 0.2 + 19.99 × 3 in cents, no binary rounding.
        let order = Order::place(
            UserId::new(1),
            vec![item(1, 1, "0.10"), item(2, 1, "0.20"), item(3, 3, "19.99")],
        )
        .unwrap();

        assert_eq!(order.total.to_string(), "60.27");
        assert_eq!(
            order.total,
            Order::compute_total(&order.items).unwrap(),
            "total is the sum of line totals"
        );
    }

    #[test]
    fn many_lines_sum_exactly() {
        let items: Vec<OrderItem> = (1..=100).map(|i| item(i, 3, "50.00")).collect();
        let order = Order::place(UserId::new(1), items).unwrap();

        assert_eq!(order.total.cents(), 100 * 3 * 5000);
    }
}

mod lifecycle {
    use super::*;

    #[test]
    fn accepted_and_rejected_paths_are_terminal() {
        for to in [OrderStatus::Paid, OrderStatus::PaymentFailed] {
            let mut order = Order::place(UserId::new(1), vec![item(1, 1, "1.00")]).unwrap();
            order.transition(to).unwrap();

            assert!(order.status.is_terminal());
            for next in [
                OrderStatus::AwaitingPayment,
                OrderStatus::Paid,
                OrderStatus::PaymentFailed,
                OrderStatus::Cancelled,
            ] {
                assert!(order.transition(next).is_err());
            }
        }
    }

    #[test]
    fn errors_convert_into_domain_error() {
        let mut order = Order::place(UserId::new(1), vec![item(1, 1, "1.00")]).unwrap();
        order.transition(OrderStatus::Cancelled).unwrap();

        let err: DomainError = order.transition(OrderStatus::Paid).unwrap_err().into();
        assert!(matches!(
            err,
            DomainError::Order(OrderError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn stock_deltas_form_a_batch() {
        let order = Order::place(UserId::new(1), vec![item(1, 2, "1.00"), item(1, 1, "1.00")])
            .unwrap();

        let batch = StockAdjustmentBatch::new(order.stock_deltas())
            .with_idempotency_key(order.id.to_string());

        assert_eq!(batch.net_deltas()[&ProductId::new(1)], -3);
        assert_eq!(batch.idempotency_key, Some(order.id.to_string()));
    }
}

mod facts {
    use super::*;

    #[test]
    fn fact_round_trips_through_json() {
        let order = Order::place(UserId::new(5), vec![item(1, 2, "50.00")]).unwrap();
        let fact = OrderCreatedFact::from(&order);

        let json = serde_json::to_value(&fact).unwrap();
        let decoded: OrderCreatedFact = serde_json::from_value(json).unwrap();

        assert_eq!(decoded, fact);
        assert!(decoded.validate().is_ok());
    }

    #[test]
    fn fact_with_numeric_money_is_accepted() {
        let order = Order::place(UserId::new(5), vec![item(1, 2, "50.00")]).unwrap();
        let mut json = serde_json::to_value(OrderCreatedFact::from(&order)).unwrap();
        json["total"] = serde_json::json!(100);
        json["products"][0]["unitPrice"] = serde_json::json!(50.0);

        let fact: OrderCreatedFact = serde_json::from_value(json).unwrap();
        assert!(fact.validate().is_ok());
    }

    #[test]
    fn placeholder_carries_fact_total() {
        let order = Order::place(UserId::new(5), vec![item(1, 2, "50.00")]).unwrap();
        let fact = OrderCreatedFact::from(&order);

        let payment = Payment::placeholder(fact.order_id, fact.total);
        assert_eq!(payment.value, order.total);
        assert_eq!(payment.status, PaymentStatus::PendingProcess);
    }
}
