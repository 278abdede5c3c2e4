//! Consumption of order-created facts into payment placeholders.

use std::sync::Arc;

use async_trait::async_trait;
use domain::{ORDER_CREATED_FACT_TYPE, OrderCreatedFact};
use event_log::{FactEnvelope, FactHandler, HandleError};

use crate::decision::PaymentDecisionEngine;

/// Registers a pending payment for every order-created fact.
///
/// Malformed facts are rejected (logged and dropped by the subscriber).
/// Ledger failures ask for redelivery. Redelivered facts are harmless: the
/// ledger's create-if-absent keeps a single placeholder per order.
pub struct OrderCreatedHandler {
    engine: Arc<PaymentDecisionEngine>,
}

impl OrderCreatedHandler {
    pub fn new(engine: Arc<PaymentDecisionEngine>) -> Self {
        Self { engine }
    }
}

#[async_trait]
impl FactHandler for OrderCreatedHandler {
    fn name(&self) -> &'static str {
        "OrderCreatedHandler"
    }

    async fn handle(&self, fact: &FactEnvelope) -> Result<(), HandleError> {
        if fact.fact_type != ORDER_CREATED_FACT_TYPE {
            return Err(HandleError::Rejected(format!(
                "unexpected fact type {}",
                fact.fact_type
            )));
        }

        let order_fact: OrderCreatedFact = fact
            .decode()
            .map_err(|e| HandleError::Rejected(format!("malformed order-created fact: {e}")))?;
        order_fact
            .validate()
            .map_err(|e| HandleError::Rejected(format!("invalid order-created fact: {e}")))?;

        self.engine
            .register_placeholder(&order_fact)
            .await
            .map(|_| ())
            .map_err(|e| HandleError::Retry(e.to_string()))
    }
}
