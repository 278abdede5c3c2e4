use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::{EventLog, FactEnvelope, FactId, NewFact, Offset, Result};

/// PostgreSQL-backed event log.
///
/// Facts live in the `facts` table keyed by `(topic, position)`; consumer
/// groups keep their progress in `consumer_offsets`. Offset assignment is
/// serialized per topic with a transaction-scoped advisory lock so that
/// positions stay dense under concurrent publishers.
#[derive(Clone)]
pub struct PostgresEventLog {
    pool: PgPool,
}

impl PostgresEventLog {
    /// Creates a new PostgreSQL event log.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects to `database_url` and returns a log over a fresh pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn row_to_fact(row: PgRow) -> Result<FactEnvelope> {
        let headers_json: serde_json::Value = row.try_get("headers")?;
        let headers: HashMap<String, serde_json::Value> = serde_json::from_value(headers_json)?;

        Ok(FactEnvelope {
            fact_id: FactId::from_uuid(row.try_get::<Uuid, _>("id")?),
            topic: row.try_get("topic")?,
            key: row.try_get("fact_key")?,
            offset: Offset::new(row.try_get("position")?),
            fact_type: row.try_get("fact_type")?,
            published_at: row.try_get("published_at")?,
            payload: row.try_get("payload")?,
            headers,
        })
    }
}

#[async_trait]
impl EventLog for PostgresEventLog {
    #[tracing::instrument(skip(self, fact), fields(topic = %fact.topic, key = %fact.key))]
    async fn publish(&self, fact: NewFact) -> Result<FactEnvelope> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&fact.topic)
            .execute(&mut *tx)
            .await?;

        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(position) FROM facts WHERE topic = $1")
                .bind(&fact.topic)
                .fetch_one(&mut *tx)
                .await?;
        let offset = Offset::new(latest.unwrap_or(0)).next();
        let published_at = Utc::now();
        let headers_json = serde_json::to_value(&fact.headers)?;

        sqlx::query(
            r#"
            INSERT INTO facts (id, topic, position, fact_key, fact_type, published_at, payload, headers)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(fact.fact_id.as_uuid())
        .bind(&fact.topic)
        .bind(offset.as_i64())
        .bind(&fact.key)
        .bind(&fact.fact_type)
        .bind(published_at)
        .bind(&fact.payload)
        .bind(headers_json)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        metrics::counter!("event_log_facts_published_total").increment(1);

        Ok(fact.into_envelope(offset, published_at))
    }

    async fn read(&self, topic: &str, after: Offset, limit: usize) -> Result<Vec<FactEnvelope>> {
        let rows = sqlx::query(
            r#"
            SELECT id, topic, position, fact_key, fact_type, published_at, payload, headers
            FROM facts
            WHERE topic = $1 AND position > $2
            ORDER BY position ASC
            LIMIT $3
            "#,
        )
        .bind(topic)
        .bind(after.as_i64())
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_fact).collect()
    }

    async fn latest_offset(&self, topic: &str) -> Result<Offset> {
        let latest: Option<i64> =
            sqlx::query_scalar("SELECT MAX(position) FROM facts WHERE topic = $1")
                .bind(topic)
                .fetch_one(&self.pool)
                .await?;
        Ok(Offset::new(latest.unwrap_or(0)))
    }

    async fn committed_offset(&self, topic: &str, group: &str) -> Result<Offset> {
        let committed: Option<i64> = sqlx::query_scalar(
            "SELECT committed FROM consumer_offsets WHERE topic = $1 AND group_id = $2",
        )
        .bind(topic)
        .bind(group)
        .fetch_optional(&self.pool)
        .await?;
        Ok(Offset::new(committed.unwrap_or(0)))
    }

    async fn commit_offset(&self, topic: &str, group: &str, offset: Offset) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO consumer_offsets (topic, group_id, committed, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (topic, group_id) DO UPDATE SET
                committed = GREATEST(consumer_offsets.committed, EXCLUDED.committed),
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(topic)
        .bind(group)
        .bind(offset.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}
