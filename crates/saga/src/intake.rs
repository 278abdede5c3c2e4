//! Order intake: validation, pricing and persistence of new orders.

use std::collections::HashMap;
use std::sync::Arc;

use domain::{
    ORDER_CREATED_FACT_TYPE, ORDER_CREATED_TOPIC, Order, OrderCreatedFact, OrderItem, Product,
    ProductId, UserId,
};
use event_log::{EventLog, EventLogExt};
use futures_util::future::try_join_all;
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::catalog::Catalog;
use crate::services::orders::OrderStore;
use crate::services::users::UserDirectory;

/// One requested line: a product and how many of it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: i64,
}

impl OrderLine {
    pub fn new(product_id: ProductId, quantity: i64) -> Self {
        Self {
            product_id,
            quantity,
        }
    }
}

/// Validates purchase requests against the user and catalog collaborators
/// and persists the resulting order in `AWAITING_PAYMENT`.
///
/// Stock is only checked here, never reserved; the decrement happens during
/// settlement.
pub struct OrderIntake {
    users: Arc<dyn UserDirectory>,
    catalog: Arc<dyn Catalog>,
    orders: Arc<dyn OrderStore>,
    facts: Option<Arc<dyn EventLog>>,
}

impl OrderIntake {
    pub fn new(
        users: Arc<dyn UserDirectory>,
        catalog: Arc<dyn Catalog>,
        orders: Arc<dyn OrderStore>,
    ) -> Self {
        Self {
            users,
            catalog,
            orders,
            facts: None,
        }
    }

    /// Publishes an order-created fact to `log` after each order is persisted.
    pub fn with_fact_log(mut self, log: Arc<dyn EventLog>) -> Self {
        self.facts = Some(log);
        self
    }

    /// Creates an order for `user_id`.
    #[tracing::instrument(skip(self, lines), fields(%user_id, lines = lines.len()))]
    pub async fn create_order(&self, user_id: UserId, lines: Vec<OrderLine>) -> Result<Order> {
        if lines.is_empty() {
            return Err(SagaError::Validation(
                "An order needs a user and at least one item".to_string(),
            ));
        }
        let mut requested: HashMap<ProductId, u64> = HashMap::new();
        for line in &lines {
            let quantity = u32::try_from(line.quantity)
                .ok()
                .filter(|q| *q > 0)
                .ok_or_else(|| {
                    SagaError::Validation(format!(
                        "Invalid quantity for product {}: {} (must be a positive integer)",
                        line.product_id, line.quantity
                    ))
                })?;
            *requested.entry(line.product_id).or_insert(0) += u64::from(quantity);
        }

        let user = self.users.get_user(user_id).await?;
        if !user.role.can_place_orders() {
            return Err(SagaError::Forbidden(
                "Only users with the CLIENT role can place orders".to_string(),
            ));
        }

        let products = self.fetch_products(requested.keys().copied()).await?;

        for (product_id, quantity) in &requested {
            let product = &products[product_id];
            if !product.has_stock_for(*quantity) {
                return Err(SagaError::InsufficientStock(format!(
                    "Insufficient stock for \"{}\": available {}, requested {}",
                    product.name, product.stock, quantity
                )));
            }
        }

        let items = lines
            .iter()
            .map(|line| {
                let product = &products[&line.product_id];
                // Quantities were validated above.
                let quantity = u32::try_from(line.quantity).unwrap_or_default();
                OrderItem::new(product.id, product.name.clone(), quantity, product.price)
            })
            .collect();

        let order = self.orders.insert(Order::place(user_id, items)?).await?;
        metrics::counter!("orders_created_total").increment(1);
        tracing::info!(order_id = %order.id, total = %order.total, "order created");

        self.publish_fact(&order).await;

        Ok(order)
    }

    /// Looks up every product concurrently; any failure fails the whole join.
    async fn fetch_products(
        &self,
        ids: impl Iterator<Item = ProductId>,
    ) -> Result<HashMap<ProductId, Product>> {
        let lookups = ids.map(|id| {
            let catalog = Arc::clone(&self.catalog);
            async move {
                let product = catalog.get_product(id).await?;
                if !product.is_active {
                    return Err(SagaError::NotFound(format!("Product {id} not found")));
                }
                Ok::<_, SagaError>((id, product))
            }
        });
        Ok(try_join_all(lookups).await?.into_iter().collect())
    }

    async fn publish_fact(&self, order: &Order) {
        let Some(log) = &self.facts else {
            return;
        };

        let fact = OrderCreatedFact::from(order);
        match log
            .publish_json(
                ORDER_CREATED_TOPIC,
                &order.id.to_string(),
                ORDER_CREATED_FACT_TYPE,
                &fact,
            )
            .await
        {
            Ok(envelope) => {
                metrics::counter!("order_facts_published_total").increment(1);
                tracing::debug!(order_id = %order.id, offset = %envelope.offset, "order-created fact published");
            }
            Err(e) => {
                // The order is persisted; the synchronous path stays authoritative.
                metrics::counter!("order_facts_failed_total").increment(1);
                tracing::error!(order_id = %order.id, error = %e, "failed to publish order-created fact");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryCatalog, InMemoryOrderStore, InMemoryUserDirectory};
    use domain::{Money, OrderStatus, Role, User};
    use event_log::InMemoryEventLog;

    struct Fixture {
        intake: OrderIntake,
        orders: InMemoryOrderStore,
        log: Arc<InMemoryEventLog>,
    }

    async fn fixture() -> Fixture {
        let users = InMemoryUserDirectory::new();
        users
            .insert(User::new(UserId::new(1), "Ana", "ana@example.com", Role::Client))
            .await;
        users
            .insert(User::new(UserId::new(2), "Root", "root@example.com", Role::Admin))
            .await;

        let catalog = InMemoryCatalog::new();
        catalog
            .insert(Product::new(ProductId::new(10), "Mouse", Money::from_cents(5000), 2))
            .await;
        let mut retired = Product::new(ProductId::new(11), "Old", Money::from_cents(100), 5);
        retired.is_active = false;
        catalog.insert(retired).await;

        let orders = InMemoryOrderStore::new();
        let log = Arc::new(InMemoryEventLog::new());
        let intake = OrderIntake::new(
            Arc::new(users),
            Arc::new(catalog),
            Arc::new(orders.clone()),
        )
        .with_fact_log(log.clone());

        Fixture {
            intake,
            orders,
            log,
        }
    }

    #[tokio::test]
    async fn test_creates_order_and_publishes_fact() {
        let f = fixture().await;

        let order = f
            .intake
            .create_order(UserId::new(1), vec![OrderLine::new(ProductId::new(10), 2)])
            .await
            .unwrap();

        assert_eq!(order.total, Money::from_cents(10000));
        assert_eq!(order.status, OrderStatus::AwaitingPayment);
        assert_eq!(order.items[0].name, "Mouse");
        assert_eq!(f.orders.order_count().await, 1);
        assert_eq!(f.log.fact_count(ORDER_CREATED_TOPIC).await, 1);
    }

    #[tokio::test]
    async fn test_rejects_non_clients() {
        let f = fixture().await;
        let err = f
            .intake
            .create_order(UserId::new(2), vec![OrderLine::new(ProductId::new(10), 1)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn test_rejects_empty_and_non_positive_lines() {
        let f = fixture().await;

        let empty = f.intake.create_order(UserId::new(1), vec![]).await;
        assert!(matches!(empty, Err(SagaError::Validation(_))));

        let zero = f
            .intake
            .create_order(UserId::new(1), vec![OrderLine::new(ProductId::new(10), 0)])
            .await;
        assert!(matches!(zero, Err(SagaError::Validation(_))));

        let negative = f
            .intake
            .create_order(UserId::new(1), vec![OrderLine::new(ProductId::new(10), -1)])
            .await;
        assert!(matches!(negative, Err(SagaError::Validation(_))));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_products_are_not_found() {
        let f = fixture().await;

        for id in [99, 11] {
            let err = f
                .intake
                .create_order(UserId::new(1), vec![OrderLine::new(ProductId::new(id), 1)])
                .await
                .unwrap_err();
            assert_eq!(err.code(), "NOT_FOUND");
        }
        assert_eq!(f.orders.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_duplicate_lines_are_checked_together() {
        let f = fixture().await;

        let err = f
            .intake
            .create_order(
                UserId::new(1),
                vec![
                    OrderLine::new(ProductId::new(10), 2),
                    OrderLine::new(ProductId::new(10), 1),
                ],
            )
            .await
            .unwrap_err();

        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(f.orders.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_unknown_user_is_not_found() {
        let f = fixture().await;
        let err = f
            .intake
            .create_order(UserId::new(42), vec![OrderLine::new(ProductId::new(10), 1)])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}
