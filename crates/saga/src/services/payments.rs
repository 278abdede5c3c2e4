//! Payment ledger trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::{OrderId, Payment};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Payment rows keyed by order id.
///
/// A ledger holds at most one row per order. Implementations backed by a
/// database enforce this with a unique index on the order id.
#[async_trait]
pub trait PaymentLedger: Send + Sync {
    /// Returns the row for `order_id`, if any.
    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Payment>>;

    /// Inserts `payment` unless a row for its order already exists.
    ///
    /// Returns the surviving row and whether it was created by this call.
    async fn create_if_absent(&self, payment: Payment) -> Result<(Payment, bool)>;

    /// Records the outcome on the pending row for `order_id`.
    async fn finalize(
        &self,
        order_id: OrderId,
        method: Option<String>,
        accepted: bool,
    ) -> Result<Payment>;
}

/// In-memory payment ledger for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPaymentLedger {
    payments: Arc<RwLock<HashMap<OrderId, Payment>>>,
    fail_on_write: Arc<AtomicBool>,
}

impl InMemoryPaymentLedger {
    /// Creates a new empty ledger.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the ledger to fail every write.
    pub fn set_fail_on_write(&self, fail: bool) {
        self.fail_on_write.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of rows.
    pub async fn payment_count(&self) -> usize {
        self.payments.read().await.len()
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_on_write.load(Ordering::SeqCst) {
            return Err(SagaError::upstream("payment ledger unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl PaymentLedger for InMemoryPaymentLedger {
    async fn find_by_order(&self, order_id: OrderId) -> Result<Option<Payment>> {
        Ok(self.payments.read().await.get(&order_id).cloned())
    }

    async fn create_if_absent(&self, payment: Payment) -> Result<(Payment, bool)> {
        self.check_writable()?;

        // Lookup and insert happen under one write lock.
        let mut payments = self.payments.write().await;
        if let Some(existing) = payments.get(&payment.order_id) {
            return Ok((existing.clone(), false));
        }
        payments.insert(payment.order_id, payment.clone());
        Ok((payment, true))
    }

    async fn finalize(
        &self,
        order_id: OrderId,
        method: Option<String>,
        accepted: bool,
    ) -> Result<Payment> {
        self.check_writable()?;

        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&order_id).ok_or_else(|| {
            SagaError::NotFound(format!("No payment registered for order {order_id}"))
        })?;
        payment.record_decision(method, accepted)?;
        Ok(payment.clone())
    }
}
