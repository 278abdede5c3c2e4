//! Durable notification queue on an AMQP 0.9.1 broker.

use std::time::Duration;

use async_trait::async_trait;
use domain::Notification;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};
use crate::services::notifications::NotificationQueue;

/// An open connection with one channel on which `queue` is declared durable.
pub struct BrokerHandle {
    /// Kept so the connection lives as long as the channel.
    pub connection: Connection,
    pub channel: Channel,
}

impl BrokerHandle {
    pub fn is_connected(&self) -> bool {
        self.connection.status().connected() && self.channel.status().connected()
    }
}

/// Connects to `url`, opens a channel and declares `queue` as durable.
pub async fn open_channel(url: &str, queue: &str, connection_name: &str) -> Result<BrokerHandle> {
    let connection = Connection::connect(
        url,
        ConnectionProperties::default().with_connection_name(connection_name.into()),
    )
    .await
    .map_err(|e| SagaError::Broker(format!("connection failed: {e}")))?;

    let channel = connection
        .create_channel()
        .await
        .map_err(|e| SagaError::Broker(format!("channel creation failed: {e}")))?;

    channel
        .queue_declare(
            queue,
            QueueDeclareOptions {
                durable: true,
                ..Default::default()
            },
            FieldTable::default(),
        )
        .await
        .map_err(|e| SagaError::Broker(format!("failed to declare queue {queue}: {e}")))?;

    Ok(BrokerHandle {
        connection,
        channel,
    })
}

/// Opens a channel with [`open_channel`] and puts it in publisher-confirm
/// mode, so every publish is answered by a broker ack or nack.
pub async fn open_confirmed_channel(
    url: &str,
    queue: &str,
    connection_name: &str,
) -> Result<BrokerHandle> {
    let handle = open_channel(url, queue, connection_name).await?;
    handle
        .channel
        .confirm_select(ConfirmSelectOptions::default())
        .await
        .map_err(|e| SagaError::Broker(format!("failed to enable publisher confirms: {e}")))?;
    Ok(handle)
}

/// Maps the broker's answer to a publish on a confirmed channel.
///
/// Only an ack means the broker took responsibility for the message.
fn check_confirmation(confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(SagaError::Broker(
            "broker rejected the notification".to_string(),
        )),
        Confirmation::NotRequested => Err(SagaError::Broker(
            "publish was not confirmed by the broker".to_string(),
        )),
    }
}

/// Calls [`open_channel`] until it succeeds, sleeping `retry_delay` between
/// attempts. With `confirms` set the channel is opened through
/// [`open_confirmed_channel`].
pub async fn open_channel_with_retry(
    url: &str,
    queue: &str,
    connection_name: &str,
    retry_delay: Duration,
    confirms: bool,
) -> BrokerHandle {
    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        let opened = if confirms {
            open_confirmed_channel(url, queue, connection_name).await
        } else {
            open_channel(url, queue, connection_name).await
        };
        match opened {
            Ok(handle) => {
                tracing::info!(queue, attempt, "connected to message broker");
                return handle;
            }
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    attempt,
                    retry_in_ms = retry_delay.as_millis() as u64,
                    "message broker unavailable, retrying"
                );
                tokio::time::sleep(retry_delay).await;
            }
        }
    }
}

/// Publishes notifications as persistent JSON messages on a durable queue.
///
/// The channel runs in publisher-confirm mode; a publish succeeds only once
/// the broker acked it.
///
/// The broker handle is a process-scoped resource acquired at startup. When
/// a publish finds the connection gone, the queue reconnects once with a
/// short backoff and retries; if that fails the error is returned.
pub struct AmqpNotificationQueue {
    url: String,
    queue: String,
    reconnect_backoff: Duration,
    handle: RwLock<Option<BrokerHandle>>,
}

impl AmqpNotificationQueue {
    const CONNECTION_NAME: &'static str = "order-fulfillment-notifications";

    /// Connects once, failing if the broker is unreachable.
    pub async fn connect(url: impl Into<String>, queue: impl Into<String>) -> Result<Self> {
        let url = url.into();
        let queue = queue.into();
        let handle = open_confirmed_channel(&url, &queue, Self::CONNECTION_NAME).await?;
        Ok(Self::from_handle(url, queue, handle))
    }

    /// Connects with a fixed delay between attempts until the broker answers.
    pub async fn connect_with_retry(
        url: impl Into<String>,
        queue: impl Into<String>,
        retry_delay: Duration,
    ) -> Self {
        let url = url.into();
        let queue = queue.into();
        let handle =
            open_channel_with_retry(&url, &queue, Self::CONNECTION_NAME, retry_delay, true).await;
        Self::from_handle(url, queue, handle)
    }

    fn from_handle(url: String, queue: String, handle: BrokerHandle) -> Self {
        Self {
            url,
            queue,
            reconnect_backoff: Duration::from_millis(500),
            handle: RwLock::new(Some(handle)),
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    async fn reconnect(&self) -> Result<()> {
        let mut handle = self.handle.write().await;
        if handle.as_ref().is_some_and(BrokerHandle::is_connected) {
            return Ok(());
        }
        tokio::time::sleep(self.reconnect_backoff).await;
        *handle =
            Some(open_confirmed_channel(&self.url, &self.queue, Self::CONNECTION_NAME).await?);
        tracing::info!(queue = %self.queue, "reconnected to message broker");
        Ok(())
    }

    async fn try_publish(&self, payload: &[u8]) -> Result<()> {
        let handle = self.handle.read().await;
        let handle = handle
            .as_ref()
            .filter(|h| h.is_connected())
            .ok_or_else(|| SagaError::Broker("broker connection unavailable".to_string()))?;

        let confirm = handle
            .channel
            .basic_publish(
                "",
                &self.queue,
                BasicPublishOptions::default(),
                payload,
                BasicProperties::default()
                    .with_delivery_mode(2)
                    .with_content_type("application/json".into()),
            )
            .await
            .map_err(|e| SagaError::Broker(format!("publish failed: {e}")))?;

        let confirmation = confirm
            .await
            .map_err(|e| SagaError::Broker(format!("publish confirmation failed: {e}")))?;
        check_confirmation(confirmation)
    }
}

#[async_trait]
impl NotificationQueue for AmqpNotificationQueue {
    #[tracing::instrument(skip(self, notification), fields(queue = %self.queue, order_id = %notification.order_id))]
    async fn publish(&self, notification: &Notification) -> Result<()> {
        let payload = serde_json::to_vec(notification)?;

        match self.try_publish(&payload).await {
            Ok(()) => Ok(()),
            Err(first) => {
                tracing::warn!(error = %first, "publish failed, reconnecting");
                self.reconnect().await?;
                self.try_publish(&payload).await
            }
        }
    }
}
