//! Notification queue trait and in-memory implementation.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use domain::Notification;
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// A durable queue the settlement outcome is published to.
#[async_trait]
pub trait NotificationQueue: Send + Sync {
    /// Publishes one message. Returns once the broker has accepted it.
    async fn publish(&self, notification: &Notification) -> Result<()>;
}

/// Records published notifications in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryNotificationQueue {
    published: Arc<RwLock<Vec<Notification>>>,
    fail_on_publish: Arc<AtomicBool>,
}

impl InMemoryNotificationQueue {
    /// Creates a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configures the queue to fail every publish.
    pub fn set_fail_on_publish(&self, fail: bool) {
        self.fail_on_publish.store(fail, Ordering::SeqCst);
    }

    /// Returns every published notification, oldest first.
    pub async fn published(&self) -> Vec<Notification> {
        self.published.read().await.clone()
    }
}

#[async_trait]
impl NotificationQueue for InMemoryNotificationQueue {
    async fn publish(&self, notification: &Notification) -> Result<()> {
        if self.fail_on_publish.load(Ordering::SeqCst) {
            return Err(SagaError::Broker("broker connection unavailable".to_string()));
        }
        self.published.write().await.push(notification.clone());
        Ok(())
    }
}
