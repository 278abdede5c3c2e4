//! Notification relay: fire-and-forget publication of settlement outcomes.

use std::sync::Arc;

use domain::{Notification, NotificationStatus, OrderId};

use crate::services::notifications::NotificationQueue;

/// Publishes outcome notifications without ever failing the caller.
///
/// Broker errors are logged and counted; the settlement that triggered the
/// notification still succeeds.
#[derive(Clone)]
pub struct NotificationRelay {
    queue: Arc<dyn NotificationQueue>,
}

impl NotificationRelay {
    pub fn new(queue: Arc<dyn NotificationQueue>) -> Self {
        Self { queue }
    }

    /// Publishes `{order_id, status, message}`. Returns true if the broker
    /// accepted the message.
    #[tracing::instrument(skip(self, message), fields(%order_id, %status))]
    pub async fn publish(
        &self,
        order_id: OrderId,
        status: NotificationStatus,
        message: impl Into<String>,
    ) -> bool {
        let notification = Notification::new(order_id, status, message);
        self.publish_notification(&notification).await
    }

    /// Publishes a prepared notification.
    pub async fn publish_notification(&self, notification: &Notification) -> bool {
        match self.queue.publish(notification).await {
            Ok(()) => {
                metrics::counter!("notifications_published_total").increment(1);
                tracing::info!(
                    order_id = %notification.order_id,
                    status = %notification.status,
                    "notification published"
                );
                true
            }
            Err(e) => {
                metrics::counter!("notifications_failed_total").increment(1);
                tracing::error!(
                    error = %e,
                    order_id = %notification.order_id,
                    status = %notification.status,
                    "failed to publish notification"
                );
                false
            }
        }
    }
}
