//! Order store trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{Order, OrderId, OrderStatus};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Persistence for orders.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order.
    async fn insert(&self, order: Order) -> Result<Order>;

    /// Loads an order by id.
    async fn get(&self, id: OrderId) -> Result<Option<Order>>;

    /// Lists all orders, newest first.
    async fn list(&self) -> Result<Vec<Order>>;

    /// Conditionally moves an order to `to`.
    ///
    /// When `from` is given the write only succeeds if the order currently
    /// has that status. Either way the move must be allowed by the status
    /// state machine. Losing writers get [`SagaError::Conflict`].
    async fn transition(
        &self,
        id: OrderId,
        from: Option<OrderStatus>,
        to: OrderStatus,
    ) -> Result<Order>;
}

#[derive(Debug, Default)]
struct OrderTable {
    orders: HashMap<OrderId, Order>,
    /// Insertion order, used to break `created_at` ties when listing.
    sequence: Vec<OrderId>,
}

/// In-memory order store for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryOrderStore {
    table: Arc<RwLock<OrderTable>>,
    fail_on_transition: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the store to fail every status write.
    pub fn set_fail_on_transition(&self, fail: bool) {
        self.fail_on_transition.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.table.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn insert(&self, order: Order) -> Result<Order> {
        let mut table = self.table.write().await;
        if table.orders.contains_key(&order.id) {
            return Err(SagaError::Conflict(format!(
                "Order {} already exists",
                order.id
            )));
        }
        table.sequence.push(order.id);
        table.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: OrderId) -> Result<Option<Order>> {
        Ok(self.table.read().await.orders.get(&id).cloned())
    }

    async fn list(&self) -> Result<Vec<Order>> {
        let table = self.table.read().await;
        let mut orders: Vec<Order> = table
            .sequence
            .iter()
            .rev()
            .filter_map(|id| table.orders.get(id).cloned())
            .collect();
        // Stable: equal timestamps keep newest-inserted first.
        orders.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(orders)
    }

    async fn transition(
        &self,
        id: OrderId,
        from: Option<OrderStatus>,
        to: OrderStatus,
    ) -> Result<Order> {
        if self.fail_on_transition.load(Ordering::SeqCst) {
            return Err(SagaError::upstream("order store unavailable"));
        }

        let mut table = self.table.write().await;
        let order = table
            .orders
            .get_mut(&id)
            .ok_or_else(|| SagaError::NotFound(format!("Order {id} not found")))?;

        if let Some(expected) = from {
            if order.status != expected {
                return Err(SagaError::Conflict(format!(
                    "Order {id} is {}, expected {expected}",
                    order.status
                )));
            }
        }
        order.transition(to)?;

        Ok(order.clone())
    }
}
