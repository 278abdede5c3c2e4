//! Consumer side of the payment notification queue.
//!
//! The notifier reads every message from the durable queue, logs it and
//! acknowledges it. Messages that do not parse are logged and acknowledged
//! as well, so a poison message never blocks the queue.

use domain::Notification;
use futures_util::StreamExt;
use lapin::options::{BasicAckOptions, BasicConsumeOptions};
use lapin::types::FieldTable;
use saga::SagaError;
use saga::services::amqp::BrokerHandle;
use tokio::sync::watch;

/// What happened to one delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Received {
    Notification(Notification),
    Malformed(String),
}

/// Parses and logs one message body.
pub fn handle_message(payload: &[u8]) -> Received {
    match serde_json::from_slice::<Notification>(payload) {
        Ok(notification) => {
            metrics::counter!("notifications_received_total", "status" => notification.status.as_str())
                .increment(1);
            tracing::info!(
                order_id = %notification.order_id,
                status = %notification.status,
                message = %notification.message,
                "notification received"
            );
            Received::Notification(notification)
        }
        Err(e) => {
            metrics::counter!("notifications_malformed_total").increment(1);
            tracing::warn!(
                error = %e,
                payload = %String::from_utf8_lossy(payload),
                "dropping malformed notification"
            );
            Received::Malformed(e.to_string())
        }
    }
}

/// Consumes `queue` on `broker` until `shutdown` flips to `true` or the
/// consumer stream ends.
pub async fn consume(
    broker: &BrokerHandle,
    queue: &str,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), SagaError> {
    let mut consumer = broker
        .channel
        .basic_consume(
            queue,
            "notifier",
            BasicConsumeOptions::default(),
            FieldTable::default(),
        )
        .await
        .map_err(|e| SagaError::Broker(format!("failed to consume {queue}: {e}")))?;

    tracing::info!(queue, "waiting for notifications");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let delivery = tokio::select! {
            next = consumer.next() => match next {
                Some(delivery) => delivery,
                None => break,
            },
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        };

        let delivery =
            delivery.map_err(|e| SagaError::Broker(format!("delivery failed: {e}")))?;
        handle_message(&delivery.data);
        broker
            .channel
            .basic_ack(delivery.delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SagaError::Broker(format!("ack failed: {e}")))?;
    }

    tracing::info!(queue, "notification consumer stopped");
    Ok(())
}
