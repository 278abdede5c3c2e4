//! Catalog/stock trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{Product, ProductId, StockAdjustmentBatch};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Product reads and atomic stock adjustment.
#[async_trait]
pub trait Catalog: Send + Sync {
    /// Returns the product snapshot or [`SagaError::NotFound`].
    async fn get_product(&self, id: ProductId) -> Result<Product>;

    /// Applies every adjustment in the batch or none of them.
    ///
    /// Fails with [`SagaError::NotFound`] if any product is missing and with
    /// [`SagaError::InsufficientStock`] if any counter would go negative.
    /// A batch whose idempotency key was already applied is a no-op that
    /// returns the current records.
    async fn adjust_stock(&self, batch: &StockAdjustmentBatch) -> Result<Vec<Product>>;
}

#[derive(Debug, Default)]
struct InMemoryCatalogState {
    products: HashMap<ProductId, Product>,
    applied_keys: HashSet<String>,
    adjust_calls: usize,
}

/// In-memory catalog for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCatalog {
    state: Arc<RwLock<InMemoryCatalogState>>,
    fail_on_adjust: Arc<AtomicBool>,
}

impl InMemoryCatalog {
    /// Creates a new empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a product.
    pub async fn insert(&self, product: Product) {
        self.state.write().await.products.insert(product.id, product);
    }

    /// Configures the catalog to fail every adjust call.
    pub fn set_fail_on_adjust(&self, fail: bool) {
        self.fail_on_adjust.store(fail, Ordering::SeqCst);
    }

    /// Returns the stock counter of a product.
    pub async fn stock_of(&self, id: ProductId) -> Option<i64> {
        self.state.read().await.products.get(&id).map(|p| p.stock)
    }

    /// Returns how many adjust calls reached the catalog, including no-ops.
    pub async fn adjust_calls(&self) -> usize {
        self.state.read().await.adjust_calls
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn get_product(&self, id: ProductId) -> Result<Product> {
        self.state
            .read()
            .await
            .products
            .get(&id)
            .cloned()
            .ok_or_else(|| SagaError::NotFound(format!("Product {id} not found")))
    }

    async fn adjust_stock(&self, batch: &StockAdjustmentBatch) -> Result<Vec<Product>> {
        let mut state = self.state.write().await;
        state.adjust_calls += 1;

        if self.fail_on_adjust.load(Ordering::SeqCst) {
            return Err(SagaError::upstream("catalog unavailable"));
        }

        let ids: Vec<ProductId> = batch.adjustments.iter().map(|a| a.product_id).collect();

        if let Some(key) = &batch.idempotency_key {
            if state.applied_keys.contains(key) {
                tracing::debug!(idempotency_key = %key, "stock batch already applied");
                return Ok(ids
                    .iter()
                    .filter_map(|id| state.products.get(id).cloned())
                    .collect());
            }
        }

        // Validate the whole batch before touching any counter.
        let net = batch.net_deltas();
        for (id, delta) in &net {
            let product = state
                .products
                .get(id)
                .ok_or_else(|| SagaError::NotFound(format!("Product {id} not found")))?;
            if product.stock + delta < 0 {
                return Err(SagaError::InsufficientStock(format!(
                    "Insufficient stock for product {}: available {}, requested {}",
                    product.name, product.stock, -delta
                )));
            }
        }

        for (id, delta) in &net {
            if let Some(product) = state.products.get_mut(id) {
                product.stock += delta;
            }
        }
        if let Some(key) = &batch.idempotency_key {
            state.applied_keys.insert(key.clone());
        }

        Ok(net
            .keys()
            .filter_map(|id| state.products.get(id).cloned())
            .collect())
    }
}
