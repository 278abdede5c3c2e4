use async_trait::async_trait;
use serde::Serialize;

use crate::{FactEnvelope, NewFact, Offset, Result};

/// Core trait for event log implementations.
///
/// All implementations must be thread-safe (Send + Sync). Offsets are
/// assigned per topic and never reused.
#[async_trait]
pub trait EventLog: Send + Sync {
    /// Appends a fact to its topic and returns it stamped with its offset.
    async fn publish(&self, fact: NewFact) -> Result<FactEnvelope>;

    /// Reads up to `limit` facts of `topic` with an offset strictly greater
    /// than `after`, oldest first.
    async fn read(&self, topic: &str, after: Offset, limit: usize) -> Result<Vec<FactEnvelope>>;

    /// Returns the offset of the newest fact on `topic`, or [`Offset::start`]
    /// if the topic is empty.
    async fn latest_offset(&self, topic: &str) -> Result<Offset>;

    /// Returns the last offset committed by `group` on `topic`.
    async fn committed_offset(&self, topic: &str, group: &str) -> Result<Offset>;

    /// Records that `group` has consumed `topic` up to and including `offset`.
    ///
    /// Commits never move a group backwards; committing an older offset is a
    /// no-op.
    async fn commit_offset(&self, topic: &str, group: &str, offset: Offset) -> Result<()>;
}

/// Extension trait providing convenience methods for event logs.
#[async_trait]
pub trait EventLogExt: EventLog {
    /// Serializes `payload` and publishes it as a fact.
    async fn publish_json<T>(
        &self,
        topic: &str,
        key: &str,
        fact_type: &str,
        payload: &T,
    ) -> Result<FactEnvelope>
    where
        T: Serialize + Sync + ?Sized,
    {
        let fact = NewFact::builder()
            .topic(topic)
            .key(key)
            .fact_type(fact_type)
            .payload(payload)?
            .build()?;
        self.publish(fact).await
    }

    /// Returns how many facts of `topic` the group has not committed yet.
    async fn lag(&self, topic: &str, group: &str) -> Result<i64> {
        let latest = self.latest_offset(topic).await?;
        let committed = self.committed_offset(topic, group).await?;
        Ok((latest.as_i64() - committed.as_i64()).max(0))
    }
}

// Blanket implementation for all EventLog implementations
impl<T: EventLog + ?Sized> EventLogExt for T {}
