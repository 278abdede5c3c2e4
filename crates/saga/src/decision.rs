//! Payment decision engine.
//!
//! Decides accept/reject for an order's payment and records it in the
//! ledger. It never touches orders or stock, so a decision can be retried
//! without side effects beyond the ledger row, which is guarded by
//! create-if-absent.

use std::sync::Arc;

use domain::{Money, OrderCreatedFact, OrderId, Payment};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::services::payments::PaymentLedger;

/// Produces payment outcomes.
pub trait DecisionPolicy: Send + Sync {
    /// Returns true to accept the payment.
    fn accept(&self) -> bool;
}

/// Accepts with a fixed probability, independently per call.
#[derive(Debug, Clone, Copy)]
pub struct WeightedCoin {
    accept_probability: f64,
}

impl WeightedCoin {
    pub const DEFAULT_ACCEPT_PROBABILITY: f64 = 0.8;

    pub fn new(accept_probability: f64) -> Self {
        Self {
            accept_probability: accept_probability.clamp(0.0, 1.0),
        }
    }

    pub fn accept_probability(&self) -> f64 {
        self.accept_probability
    }
}

impl Default for WeightedCoin {
    fn default() -> Self {
        Self::new(Self::DEFAULT_ACCEPT_PROBABILITY)
    }
}

impl DecisionPolicy for WeightedCoin {
    fn accept(&self) -> bool {
        fastrand::f64() < self.accept_probability
    }
}

/// Always returns the same outcome.
#[derive(Debug, Clone, Copy)]
pub struct FixedDecision(pub bool);

impl DecisionPolicy for FixedDecision {
    fn accept(&self) -> bool {
        self.0
    }
}

/// A synchronous decide request. Every field is optional on the wire so
/// that missing fields surface as validation errors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecideRequest {
    pub order_id: Option<OrderId>,
    #[serde(alias = "paymentMethod")]
    pub method: Option<String>,
    pub value: Option<Money>,
    pub products: Option<Vec<serde_json::Value>>,
}

impl DecideRequest {
    /// Checks required fields and returns `(order_id, value)`.
    pub fn validate(&self) -> Result<(OrderId, Money)> {
        let missing = |field: &str| SagaError::Validation(format!("Incomplete payment data: {field} is required"));

        let order_id = self.order_id.ok_or_else(|| missing("orderId"))?;
        let value = self.value.ok_or_else(|| missing("value"))?;
        if self.products.as_ref().is_none_or(Vec::is_empty) {
            return Err(missing("products"));
        }
        if !value.is_positive() {
            return Err(SagaError::Validation(format!(
                "Payment value must be positive, got {value}"
            )));
        }
        Ok((order_id, value))
    }
}

/// Result of a decide or process call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// The outcome was decided and recorded by this call.
    Recorded(Payment),
    /// The order already had a decided payment; it is returned unchanged.
    AlreadyRecorded(Payment),
}

impl Decision {
    pub fn payment(&self) -> &Payment {
        match self {
            Decision::Recorded(p) | Decision::AlreadyRecorded(p) => p,
        }
    }

    pub fn into_payment(self) -> Payment {
        match self {
            Decision::Recorded(p) | Decision::AlreadyRecorded(p) => p,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, Decision::Recorded(_))
    }
}

/// Flips the coin and records payments in the ledger.
pub struct PaymentDecisionEngine {
    ledger: Arc<dyn PaymentLedger>,
    policy: Arc<dyn DecisionPolicy>,
}

impl PaymentDecisionEngine {
    pub fn new(ledger: Arc<dyn PaymentLedger>, policy: Arc<dyn DecisionPolicy>) -> Self {
        Self { ledger, policy }
    }

    pub fn ledger(&self) -> &Arc<dyn PaymentLedger> {
        &self.ledger
    }

    /// Synchronous entry point.
    ///
    /// An order that already holds a decided payment gets it back without a
    /// second flip. A pending placeholder is finalized in place.
    #[tracing::instrument(skip(self, request), fields(order_id = ?request.order_id))]
    pub async fn decide(&self, request: &DecideRequest) -> Result<Decision> {
        let (order_id, value) = request.validate()?;

        if let Some(existing) = self.ledger.find_by_order(order_id).await? {
            return self.settle_existing(existing, request.method.clone()).await;
        }

        let accepted = self.policy.accept();
        let candidate = Payment::decided(order_id, request.method.clone(), value, accepted);
        let (payment, created) = self.ledger.create_if_absent(candidate).await?;

        if created {
            record_outcome(&payment);
            return Ok(Decision::Recorded(payment));
        }

        // Lost the create race against the other entry point.
        tracing::info!(%order_id, "payment row appeared concurrently");
        self.settle_existing(payment, request.method.clone()).await
    }

    /// Fact-driven entry point: decides the placeholder registered for
    /// `order_id`.
    ///
    /// Fails with [`SagaError::NotFound`] if no placeholder exists and
    /// returns [`Decision::AlreadyRecorded`] if it was already decided.
    #[tracing::instrument(skip(self, method))]
    pub async fn process(&self, order_id: OrderId, method: Option<String>) -> Result<Decision> {
        let existing = self.ledger.find_by_order(order_id).await?.ok_or_else(|| {
            SagaError::NotFound(format!("No payment registered for order {order_id}"))
        })?;
        self.settle_existing(existing, method).await
    }

    /// Creates the pending placeholder for a consumed order-created fact.
    ///
    /// Redelivered facts find the existing row and create nothing.
    #[tracing::instrument(skip(self, fact), fields(order_id = %fact.order_id))]
    pub async fn register_placeholder(&self, fact: &OrderCreatedFact) -> Result<(Payment, bool)> {
        let (payment, created) = self
            .ledger
            .create_if_absent(Payment::placeholder(fact.order_id, fact.total))
            .await?;
        if created {
            tracing::info!(payment_id = %payment.id, "payment placeholder registered");
        } else {
            tracing::debug!(status = %payment.status, "payment already registered");
        }
        Ok((payment, created))
    }

    async fn settle_existing(&self, existing: Payment, method: Option<String>) -> Result<Decision> {
        if existing.is_decided() {
            return Ok(Decision::AlreadyRecorded(existing));
        }

        let accepted = self.policy.accept();
        match self
            .ledger
            .finalize(existing.order_id, method, accepted)
            .await
        {
            Ok(payment) => {
                record_outcome(&payment);
                Ok(Decision::Recorded(payment))
            }
            Err(SagaError::Conflict(_)) => {
                // Another caller finalized it between our read and write.
                let current = self
                    .ledger
                    .find_by_order(existing.order_id)
                    .await?
                    .unwrap_or(existing);
                Ok(Decision::AlreadyRecorded(current))
            }
            Err(e) => Err(e),
        }
    }
}

fn record_outcome(payment: &Payment) {
    let outcome = if payment.is_accepted() {
        "accepted"
    } else {
        "rejected"
    };
    metrics::counter!("payments_decided_total", "outcome" => outcome).increment(1);
    tracing::info!(order_id = %payment.order_id, payment_id = %payment.id, outcome, "payment decided");
}
