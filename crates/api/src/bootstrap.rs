//! Builds the application from its configuration.
//!
//! Each collaborator is remote when its URL is configured and in-memory
//! otherwise, so the service runs standalone with demo data. `DATABASE_URL`
//! moves the fact log, orders and payments to PostgreSQL together.

use std::sync::Arc;

use event_log::{EventLog, EventLogError, InMemoryEventLog, PostgresEventLog};
use saga::{
    AmqpNotificationQueue, Catalog, Collaborators, HttpCatalog, HttpUserDirectory,
    InMemoryCatalog, InMemoryNotificationQueue, InMemoryOrderStore, InMemoryPaymentLedger,
    InMemoryUserDirectory, NotificationQueue, OrderFulfillment, OrderStore, PaymentLedger,
    PostgresOrderStore, PostgresPaymentLedger, SagaError, UserDirectory, WeightedCoin,
};
use thiserror::Error;

use crate::AppState;
use crate::config::Config;
use crate::demo;

/// Startup failures.
#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("event log setup failed: {0}")]
    EventLog(#[from] EventLogError),

    #[error("collaborator setup failed: {0}")]
    Saga(#[from] SagaError),
}

/// Everything the binary needs to serve requests and consume facts.
pub struct Application {
    pub state: Arc<AppState>,
    pub event_log: Arc<dyn EventLog>,
}

/// Wires collaborators, the event log and the saga according to `config`.
pub async fn build(config: &Config) -> Result<Application, BootstrapError> {
    let users: Arc<dyn UserDirectory> = match &config.user_service_url {
        Some(url) => {
            let directory = HttpUserDirectory::new(url.as_str(), config.http_timeout)?;
            tracing::info!(base_url = directory.base_url(), "using remote user service");
            Arc::new(directory)
        }
        None => {
            let users = InMemoryUserDirectory::new();
            demo::seed_users(&users).await;
            Arc::new(users)
        }
    };

    let catalog: Arc<dyn Catalog> = match &config.product_service_url {
        Some(url) => {
            let catalog = HttpCatalog::new(url.as_str(), config.http_timeout)?;
            tracing::info!(base_url = catalog.base_url(), "using remote product service");
            Arc::new(catalog)
        }
        None => {
            let catalog = InMemoryCatalog::new();
            demo::seed_catalog(&catalog).await;
            Arc::new(catalog)
        }
    };

    let notifications: Arc<dyn NotificationQueue> = match &config.rabbitmq_url {
        Some(url) => Arc::new(
            AmqpNotificationQueue::connect_with_retry(
                url.as_str(),
                config.notification_queue.as_str(),
                config.broker_retry_delay,
            )
            .await,
        ),
        None => {
            tracing::warn!("RABBITMQ_URL not set, notifications are kept in memory");
            Arc::new(InMemoryNotificationQueue::new())
        }
    };

    // With a database the fact log, orders and payments share one pool, so
    // committed offsets never outlive the rows they refer to.
    let (event_log, orders, payments): (
        Arc<dyn EventLog>,
        Arc<dyn OrderStore>,
        Arc<dyn PaymentLedger>,
    ) = match &config.database_url {
        Some(url) => {
            let log = PostgresEventLog::connect(url).await?;
            log.run_migrations().await?;
            let pool = log.pool().clone();
            tracing::info!("PostgreSQL fact log, order store and payment ledger ready");
            (
                Arc::new(log),
                Arc::new(PostgresOrderStore::new(pool.clone())),
                Arc::new(PostgresPaymentLedger::new(pool)),
            )
        }
        None => (
            Arc::new(InMemoryEventLog::new()),
            Arc::new(InMemoryOrderStore::new()),
            Arc::new(InMemoryPaymentLedger::new()),
        ),
    };

    let collaborators = Collaborators {
        users,
        catalog,
        orders,
        payments,
        notifications,
    };
    let mut saga = OrderFulfillment::new(collaborators, Arc::new(WeightedCoin::default()));
    if config.publish_order_facts {
        saga = saga.with_fact_log(Arc::clone(&event_log));
    }

    Ok(Application {
        state: AppState::new(saga),
        event_log,
    })
}
