use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::{EventLog, FactEnvelope, NewFact, Offset, Result};

/// In-memory event log implementation for tests and single-process runs.
///
/// Provides the same interface and offset semantics as the PostgreSQL
/// implementation, but nothing survives a restart.
#[derive(Clone, Default)]
pub struct InMemoryEventLog {
    topics: Arc<RwLock<HashMap<String, Vec<FactEnvelope>>>>,
    offsets: Arc<RwLock<HashMap<(String, String), Offset>>>,
}

impl InMemoryEventLog {
    /// Creates a new empty in-memory event log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of facts stored on a topic.
    pub async fn fact_count(&self, topic: &str) -> usize {
        self.topics.read().await.get(topic).map_or(0, Vec::len)
    }

    /// Moves a consumer group back to `offset`, forcing redelivery of every
    /// later fact.
    pub async fn rewind(&self, topic: &str, group: &str, offset: Offset) {
        self.offsets
            .write()
            .await
            .insert((topic.to_string(), group.to_string()), offset);
    }

    /// Clears all facts and committed offsets.
    pub async fn clear(&self) {
        self.topics.write().await.clear();
        self.offsets.write().await.clear();
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    async fn publish(&self, fact: NewFact) -> Result<FactEnvelope> {
        let mut topics = self.topics.write().await;
        let facts = topics.entry(fact.topic.clone()).or_default();

        let offset = facts.last().map_or(Offset::start(), |f| f.offset).next();
        let envelope = fact.into_envelope(offset, Utc::now());
        facts.push(envelope.clone());

        Ok(envelope)
    }

    async fn read(&self, topic: &str, after: Offset, limit: usize) -> Result<Vec<FactEnvelope>> {
        let topics = self.topics.read().await;
        let Some(facts) = topics.get(topic) else {
            return Ok(Vec::new());
        };

        // Offsets are dense and 1-based, so the index of offset n is n - 1.
        let start = usize::try_from(after.as_i64()).unwrap_or(0);
        Ok(facts.iter().skip(start).take(limit).cloned().collect())
    }

    async fn latest_offset(&self, topic: &str) -> Result<Offset> {
        let topics = self.topics.read().await;
        Ok(topics
            .get(topic)
            .and_then(|facts| facts.last())
            .map_or(Offset::start(), |f| f.offset))
    }

    async fn committed_offset(&self, topic: &str, group: &str) -> Result<Offset> {
        let offsets = self.offsets.read().await;
        Ok(offsets
            .get(&(topic.to_string(), group.to_string()))
            .copied()
            .unwrap_or_default())
    }

    async fn commit_offset(&self, topic: &str, group: &str, offset: Offset) -> Result<()> {
        let mut offsets = self.offsets.write().await;
        let committed = offsets
            .entry((topic.to_string(), group.to_string()))
            .or_default();
        if offset > *committed {
            *committed = offset;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EventLogExt;

    fn fact(topic: &str, key: &str) -> NewFact {
        NewFact::builder()
            .topic(topic)
            .key(key)
            .fact_type("TestFact")
            .payload_raw(serde_json::json!({"key": key}))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn offsets_are_assigned_per_topic() {
        let log = InMemoryEventLog::new();

        let a1 = log.publish(fact("a", "1")).await.unwrap();
        let a2 = log.publish(fact("a", "2")).await.unwrap();
        let b1 = log.publish(fact("b", "1")).await.unwrap();

        assert_eq!(a1.offset, Offset::new(1));
        assert_eq!(a2.offset, Offset::new(2));
        assert_eq!(b1.offset, Offset::new(1));
        assert_eq!(log.fact_count("a").await, 2);
        assert_eq!(log.latest_offset("b").await.unwrap(), Offset::new(1));
    }

    #[tokio::test]
    async fn read_returns_facts_after_offset() {
        let log = InMemoryEventLog::new();
        for i in 0..5 {
            log.publish(fact("t", &i.to_string())).await.unwrap();
        }

        let facts = log.read("t", Offset::new(2), 2).await.unwrap();
        let offsets: Vec<i64> = facts.iter().map(|f| f.offset.as_i64()).collect();
        assert_eq!(offsets, vec![3, 4]);

        assert!(log.read("t", Offset::new(5), 10).await.unwrap().is_empty());
        assert!(log.read("missing", Offset::start(), 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn commits_are_per_group_and_monotonic() {
        let log = InMemoryEventLog::new();

        log.commit_offset("t", "g1", Offset::new(3)).await.unwrap();
        log.commit_offset("t", "g1", Offset::new(1)).await.unwrap();

        assert_eq!(log.committed_offset("t", "g1").await.unwrap(), Offset::new(3));
        assert_eq!(log.committed_offset("t", "g2").await.unwrap(), Offset::start());
    }

    #[tokio::test]
    async fn rewind_moves_group_backwards() {
        let log = InMemoryEventLog::new();
        log.commit_offset("t", "g", Offset::new(4)).await.unwrap();

        log.rewind("t", "g", Offset::new(1)).await;

        assert_eq!(log.committed_offset("t", "g").await.unwrap(), Offset::new(1));
    }

    #[tokio::test]
    async fn lag_counts_uncommitted_facts() {
        let log = InMemoryEventLog::new();
        for i in 0..3 {
            log.publish(fact("t", &i.to_string())).await.unwrap();
        }
        log.commit_offset("t", "g", Offset::new(1)).await.unwrap();

        assert_eq!(log.lag("t", "g").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn publish_json_serializes_payload() {
        let log = InMemoryEventLog::new();
        let envelope = log
            .publish_json("t", "k", "Typed", &serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(envelope.payload["n"], 1);
        assert_eq!(envelope.fact_type, "Typed");
    }
}
