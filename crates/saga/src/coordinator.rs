//! Fulfillment coordinator: settles a decided payment against its order.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use domain::{Notification, Order, OrderId, OrderStatus, Payment, StockAdjustmentBatch};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SagaError};
use crate::order_fulfillment;
use crate::relay::NotificationRelay;
use crate::services::catalog::Catalog;
use crate::services::orders::OrderStore;
use crate::state::{SettlementState, SettlementTrail};

/// Which branch a settlement took.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SettlementOutcome {
    Accepted,
    Rejected,
}

/// What a settlement run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettlementResult {
    pub order_id: OrderId,
    pub outcome: SettlementOutcome,
    /// Order status after the run.
    pub order_status: OrderStatus,
    pub trail: SettlementTrail,
    /// True if the broker accepted the outcome notification.
    pub notified: bool,
    /// True if the order was already terminal and nothing was done.
    pub replayed: bool,
}

/// Sequences the cross-service effects of a payment decision.
///
/// On accept: adjust stock, mark the order `PAID`, notify `APROVADO`.
/// On reject: mark the order `PAYMENT_FAILED`, notify `RECUSADO`.
///
/// The coordinator holds no persistent state. Everything it needs is
/// re-read from the stores, so a crashed settlement is resumed by calling
/// [`settle`](Self::settle) again; stock adjustment is keyed by order id and
/// the status write is conditional, so a re-run never double-applies.
///
/// If stock or status fails after the payment was accepted, the accepted
/// payment is not reversed; the run fails with
/// [`SagaError::InconsistentState`] and the remaining steps are retried by
/// settling again. An order whose stock step succeeded in this process is
/// remembered until its status write lands, so the retry does not call the
/// catalog a second time even if the catalog ignores idempotency keys.
pub struct FulfillmentCoordinator {
    catalog: Arc<dyn Catalog>,
    orders: Arc<dyn OrderStore>,
    relay: NotificationRelay,
    in_flight: Mutex<HashSet<OrderId>>,
    stock_adjusted: Mutex<HashSet<OrderId>>,
}

/// Marks an order as being settled until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<OrderId>>,
    order_id: OrderId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.set
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.order_id);
    }
}

impl FulfillmentCoordinator {
    pub fn new(
        catalog: Arc<dyn Catalog>,
        orders: Arc<dyn OrderStore>,
        relay: NotificationRelay,
    ) -> Self {
        Self {
            catalog,
            orders,
            relay,
            in_flight: Mutex::new(HashSet::new()),
            stock_adjusted: Mutex::new(HashSet::new()),
        }
    }

    fn stock_marks(&self) -> MutexGuard<'_, HashSet<OrderId>> {
        self.stock_adjusted
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    fn claim(&self, order_id: OrderId) -> Result<InFlight<'_>> {
        let mut set = self
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !set.insert(order_id) {
            return Err(SagaError::Conflict(format!(
                "Settlement of order {order_id} is already in progress"
            )));
        }
        Ok(InFlight {
            set: &self.in_flight,
            order_id,
        })
    }

    /// Settles `payment` against `order`.
    ///
    /// Settling an order that is already terminal is a no-op that succeeds
    /// with `replayed = true`, provided the terminal status is the one this
    /// payment leads to. An accepted payment on an order that ended any other
    /// way is [`SagaError::InconsistentState`]; a rejected one is a conflict.
    #[tracing::instrument(skip(self, payment, order), fields(order_id = %order.id, accepted = payment.is_accepted()))]
    pub async fn settle(&self, payment: &Payment, order: &Order) -> Result<SettlementResult> {
        if payment.order_id != order.id {
            return Err(SagaError::Validation(format!(
                "Payment {} belongs to order {}, not {}",
                payment.id, payment.order_id, order.id
            )));
        }
        let accepted = payment.accepted.ok_or_else(|| {
            SagaError::Validation(format!(
                "Payment for order {} has not been decided",
                order.id
            ))
        })?;

        let _guard = self.claim(order.id)?;
        let started = std::time::Instant::now();

        let current = self
            .orders
            .get(order.id)
            .await?
            .ok_or_else(|| SagaError::NotFound(format!("Order {} not found", order.id)))?;

        let mut trail = SettlementTrail::start(accepted);
        let outcome = if accepted {
            SettlementOutcome::Accepted
        } else {
            SettlementOutcome::Rejected
        };

        if current.status.is_terminal() {
            if current.status != settled_status(accepted) {
                return Err(contradicting(&current, accepted));
            }
            trail.advance(SettlementState::Terminal)?;
            metrics::counter!("settlements_total", "outcome" => "replayed").increment(1);
            tracing::info!(status = %current.status, "order already settled, nothing to do");
            return Ok(SettlementResult {
                order_id: current.id,
                outcome,
                order_status: current.status,
                trail,
                notified: false,
                replayed: true,
            });
        }

        let result = if accepted {
            self.settle_accepted(&current, trail).await
        } else {
            self.settle_rejected(&current, trail).await
        };

        metrics::histogram!("settlement_duration_seconds").record(started.elapsed().as_secs_f64());
        if let Ok(settled) = &result {
            let label = match outcome {
                SettlementOutcome::Accepted => "accepted",
                SettlementOutcome::Rejected => "rejected",
            };
            metrics::counter!("settlements_total", "outcome" => label).increment(1);
            tracing::info!(
                status = %settled.order_status,
                notified = settled.notified,
                duration = started.elapsed().as_secs_f64(),
                "settlement completed"
            );
        }
        result
    }

    async fn settle_accepted(
        &self,
        order: &Order,
        mut trail: SettlementTrail,
    ) -> Result<SettlementResult> {
        tracing::info!(step = order_fulfillment::STEP_ADJUST_STOCK, "settlement step started");
        let already_adjusted = self.stock_marks().contains(&order.id);
        if already_adjusted {
            tracing::info!("stock already adjusted by an earlier run, skipping");
        } else {
            let batch = StockAdjustmentBatch::new(order.stock_deltas())
                .with_idempotency_key(order.id.to_string());
            if let Err(e) = self.catalog.adjust_stock(&batch).await {
                return Err(inconsistent(order.id, order_fulfillment::STEP_ADJUST_STOCK, e));
            }
            self.stock_marks().insert(order.id);
        }
        trail.advance(SettlementState::StockAdjusted)?;

        tracing::info!(step = order_fulfillment::STEP_UPDATE_STATUS, "settlement step started");
        let updated = match self
            .orders
            .transition(order.id, Some(OrderStatus::AwaitingPayment), OrderStatus::Paid)
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                return Err(inconsistent(order.id, order_fulfillment::STEP_UPDATE_STATUS, e));
            }
        };
        self.stock_marks().remove(&order.id);
        trail.advance(SettlementState::StatusUpdated)?;

        let notified = self.notify(Notification::approved(order.id), &mut trail).await?;

        Ok(SettlementResult {
            order_id: order.id,
            outcome: SettlementOutcome::Accepted,
            order_status: updated.status,
            trail,
            notified,
            replayed: false,
        })
    }

    async fn settle_rejected(
        &self,
        order: &Order,
        mut trail: SettlementTrail,
    ) -> Result<SettlementResult> {
        tracing::info!(step = order_fulfillment::STEP_UPDATE_STATUS, "settlement step started");
        let updated = self
            .orders
            .transition(
                order.id,
                Some(OrderStatus::AwaitingPayment),
                OrderStatus::PaymentFailed,
            )
            .await?;
        trail.advance(SettlementState::StatusUpdated)?;

        let notified = self.notify(Notification::rejected(order.id), &mut trail).await?;

        Ok(SettlementResult {
            order_id: order.id,
            outcome: SettlementOutcome::Rejected,
            order_status: updated.status,
            trail,
            notified,
            replayed: false,
        })
    }

    async fn notify(
        &self,
        notification: Notification,
        trail: &mut SettlementTrail,
    ) -> Result<bool> {
        tracing::info!(step = order_fulfillment::STEP_NOTIFY, "settlement step started");
        let notified = self.relay.publish_notification(&notification).await;
        if notified {
            trail.advance(SettlementState::Notified)?;
        }
        trail.advance(SettlementState::Terminal)?;
        Ok(notified)
    }
}

fn settled_status(accepted: bool) -> OrderStatus {
    if accepted {
        OrderStatus::Paid
    } else {
        OrderStatus::PaymentFailed
    }
}

fn contradicting(order: &Order, accepted: bool) -> SagaError {
    let reason = format!(
        "Order {} is already {} but its payment was {}",
        order.id,
        order.status,
        if accepted { "accepted" } else { "rejected" }
    );
    if accepted {
        inconsistent(
            order.id,
            order_fulfillment::STEP_UPDATE_STATUS,
            SagaError::Conflict(reason),
        )
    } else {
        tracing::warn!(order_id = %order.id, status = %order.status, "rejected payment for a settled order");
        SagaError::Conflict(reason)
    }
}

fn inconsistent(order_id: OrderId, step: &'static str, cause: SagaError) -> SagaError {
    metrics::counter!("settlement_inconsistent_total", "step" => step).increment(1);
    tracing::error!(
        %order_id,
        step,
        error = %cause,
        "payment accepted but settlement step failed; reconciliation required"
    );
    SagaError::InconsistentState {
        order_id,
        step,
        reason: cause.to_string(),
    }
}
