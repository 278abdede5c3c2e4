//! User lookup trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use domain::{User, UserId};
use tokio::sync::RwLock;

use crate::error::{Result, SagaError};

/// Looks up users by id.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Returns the user or [`SagaError::NotFound`].
    async fn get_user(&self, id: UserId) -> Result<User>;
}

/// In-memory user directory for tests and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryUserDirectory {
    users: Arc<RwLock<HashMap<UserId, User>>>,
}

impl InMemoryUserDirectory {
    /// Creates a new empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a user.
    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn get_user(&self, id: UserId) -> Result<User> {
        self.users
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| SagaError::NotFound(format!("User {id} not found")))
    }
}
