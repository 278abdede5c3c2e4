//! Catalog snapshots and stock adjustments.

use std::collections::BTreeMap;

use common::ProductId;
use serde::{Deserialize, Serialize};

use crate::money::Money;

/// A product as reported by the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub price: Money,
    pub stock: i64,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl Product {
    pub fn new(id: ProductId, name: impl Into<String>, price: Money, stock: i64) -> Self {
        Self {
            id,
            name: name.into(),
            price,
            stock,
            is_active: true,
        }
    }

    /// Point-in-time check; does not reserve anything.
    pub fn has_stock_for(&self, quantity: u64) -> bool {
        i64::try_from(quantity).is_ok_and(|q| self.stock >= q)
    }
}

/// A signed change to one product's stock counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustment {
    pub product_id: ProductId,
    #[serde(alias = "quantity")]
    pub delta: i64,
}

impl StockAdjustment {
    pub fn new(product_id: ProductId, delta: i64) -> Self {
        Self { product_id, delta }
    }
}

/// A batch of stock adjustments applied all-or-nothing.
///
/// When `idempotency_key` is set, a store that has already applied a batch
/// with the same key treats the repeat as a no-op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockAdjustmentBatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub idempotency_key: Option<String>,
    pub adjustments: Vec<StockAdjustment>,
}

impl StockAdjustmentBatch {
    pub fn new(adjustments: Vec<StockAdjustment>) -> Self {
        Self {
            idempotency_key: None,
            adjustments,
        }
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.adjustments.is_empty()
    }

    /// Sums the deltas per product, so a product listed twice is checked
    /// against its combined change.
    pub fn net_deltas(&self) -> BTreeMap<ProductId, i64> {
        let mut net = BTreeMap::new();
        for adjustment in &self.adjustments {
            *net.entry(adjustment.product_id).or_insert(0) += adjustment.delta;
        }
        net
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn net_deltas_merge_duplicates() {
        let batch = StockAdjustmentBatch::new(vec![
            StockAdjustment::new(ProductId::new(1), -2),
            StockAdjustment::new(ProductId::new(2), -1),
            StockAdjustment::new(ProductId::new(1), -3),
        ]);

        let net = batch.net_deltas();
        assert_eq!(net[&ProductId::new(1)], -5);
        assert_eq!(net[&ProductId::new(2)], -1);
    }

    #[test]
    fn has_stock_for_compares_against_counter() {
        let product = Product::new(ProductId::new(1), "Mouse", Money::from_cents(5000), 2);
        assert!(product.has_stock_for(2));
        assert!(!product.has_stock_for(5));
    }

    #[test]
    fn product_defaults_to_active() {
        let product: Product = serde_json::from_value(serde_json::json!({
            "id": 4, "name": "Keyboard", "price": 120.5, "stock": 10
        }))
        .unwrap();
        assert!(product.is_active);
        assert_eq!(product.price.to_string(), "120.50");
    }
}
