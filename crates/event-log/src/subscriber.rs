//! Consumer-group subscriber that feeds facts from a topic to a handler.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;

use crate::{EventLog, FactEnvelope, Result};

/// Why a handler did not accept a fact.
#[derive(Debug, Clone, Error)]
pub enum HandleError {
    /// The fact can never be processed (malformed, unknown shape). It is
    /// logged and its offset committed, i.e. it is dropped.
    #[error("fact rejected: {0}")]
    Rejected(String),

    /// Processing failed for a transient reason. The offset is not committed
    /// and the fact is redelivered on the next poll.
    #[error("fact processing failed, will retry: {0}")]
    Retry(String),
}

/// Processes facts delivered by a [`Subscriber`].
///
/// Delivery is at-least-once: handlers must tolerate seeing the same fact
/// more than once.
#[async_trait]
pub trait FactHandler: Send + Sync {
    /// Returns the name of this handler, used in logs and metrics.
    fn name(&self) -> &'static str;

    /// Handles a single fact.
    async fn handle(&self, fact: &FactEnvelope) -> std::result::Result<(), HandleError>;
}

/// Outcome of a single poll.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollSummary {
    /// Facts handled successfully.
    pub handled: usize,
    /// Facts rejected and dropped.
    pub rejected: usize,
    /// True if the poll stopped early on a fact that asked to be retried.
    pub retry_pending: bool,
}

impl PollSummary {
    /// Number of facts whose offset was committed by this poll.
    pub fn committed(&self) -> usize {
        self.handled + self.rejected
    }
}

/// Delivers the facts of one topic to one handler on behalf of a consumer
/// group.
///
/// The subscriber keeps no state of its own: its position is the group's
/// committed offset on the log, so a restarted subscriber resumes where the
/// previous one stopped.
pub struct Subscriber<L: EventLog + ?Sized> {
    log: Arc<L>,
    topic: String,
    group: String,
    handler: Arc<dyn FactHandler>,
    batch_size: usize,
}

impl<L: EventLog + ?Sized> Subscriber<L> {
    /// Creates a subscriber for `topic` in consumer group `group`.
    pub fn new(
        log: Arc<L>,
        topic: impl Into<String>,
        group: impl Into<String>,
        handler: Arc<dyn FactHandler>,
    ) -> Self {
        Self {
            log,
            topic: topic.into(),
            group: group.into(),
            handler,
            batch_size: 100,
        }
    }

    /// Sets how many facts are read per poll.
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn group(&self) -> &str {
        &self.group
    }

    /// Reads the next batch after the committed offset and hands each fact
    /// to the handler, committing after every accepted or rejected fact.
    #[tracing::instrument(skip(self), fields(topic = %self.topic, group = %self.group, handler = self.handler.name()))]
    pub async fn poll_once(&self) -> Result<PollSummary> {
        let committed = self.log.committed_offset(&self.topic, &self.group).await?;
        let facts = self
            .log
            .read(&self.topic, committed, self.batch_size)
            .await?;

        let mut summary = PollSummary::default();
        for fact in &facts {
            match self.handler.handle(fact).await {
                Ok(()) => {
                    summary.handled += 1;
                    metrics::counter!("facts_consumed_total", "handler" => self.handler.name())
                        .increment(1);
                }
                Err(HandleError::Rejected(reason)) => {
                    summary.rejected += 1;
                    metrics::counter!("facts_rejected_total", "handler" => self.handler.name())
                        .increment(1);
                    tracing::warn!(offset = %fact.offset, fact_id = %fact.fact_id, %reason, "dropping fact");
                }
                Err(HandleError::Retry(reason)) => {
                    summary.retry_pending = true;
                    tracing::warn!(offset = %fact.offset, fact_id = %fact.fact_id, %reason, "fact will be redelivered");
                    break;
                }
            }
            self.log
                .commit_offset(&self.topic, &self.group, fact.offset)
                .await?;
        }

        if summary.committed() > 0 {
            tracing::debug!(
                handled = summary.handled,
                rejected = summary.rejected,
                "poll complete"
            );
        }

        Ok(summary)
    }

    /// Polls until `shutdown` flips to `true`.
    ///
    /// A full batch is followed immediately by another poll; otherwise the
    /// subscriber sleeps for `poll_interval`. Poll errors are logged and the
    /// loop continues.
    pub async fn run(self, poll_interval: Duration, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(topic = %self.topic, group = %self.group, handler = self.handler.name(), "subscriber started");

        loop {
            if *shutdown.borrow() {
                break;
            }

            let drained_full_batch = match self.poll_once().await {
                Ok(summary) => !summary.retry_pending && summary.committed() == self.batch_size,
                Err(e) => {
                    tracing::error!(error = %e, topic = %self.topic, "subscriber poll failed");
                    false
                }
            };
            if drained_full_batch {
                continue;
            }

            tokio::select! {
                () = tokio::time::sleep(poll_interval) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
            }
        }

        tracing::info!(topic = %self.topic, group = %self.group, "subscriber stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EventLogExt, InMemoryEventLog, Offset};
    use tokio::sync::Mutex;

    /// Records keys and fails according to the fact payload.
    #[derive(Default)]
    struct RecordingHandler {
        seen: Mutex<Vec<String>>,
        retry_once: Mutex<bool>,
    }

    #[async_trait]
    impl FactHandler for RecordingHandler {
        fn name(&self) -> &'static str {
            "RecordingHandler"
        }

        async fn handle(&self, fact: &FactEnvelope) -> std::result::Result<(), HandleError> {
            match fact.payload["mode"].as_str() {
                Some("bad") => Err(HandleError::Rejected("bad payload".to_string())),
                Some("flaky") => {
                    let mut retry = self.retry_once.lock().await;
                    if !*retry {
                        *retry = true;
                        return Err(HandleError::Retry("try again".to_string()));
                    }
                    self.seen.lock().await.push(fact.key.clone());
                    Ok(())
                }
                _ => {
                    self.seen.lock().await.push(fact.key.clone());
                    Ok(())
                }
            }
        }
    }

    async fn publish(log: &InMemoryEventLog, key: &str, mode: &str) {
        log.publish_json("t", key, "Test", &serde_json::json!({"mode": mode}))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn poll_delivers_and_commits() {
        let log = Arc::new(InMemoryEventLog::new());
        publish(&log, "a", "ok").await;
        publish(&log, "b", "ok").await;

        let handler = Arc::new(RecordingHandler::default());
        let subscriber = Subscriber::new(log.clone(), "t", "g", handler.clone());

        let summary = subscriber.poll_once().await.unwrap();
        assert_eq!(summary.handled, 2);
        assert_eq!(*handler.seen.lock().await, vec!["a", "b"]);
        assert_eq!(log.committed_offset("t", "g").await.unwrap(), Offset::new(2));

        // Nothing new: second poll is empty.
        let summary = subscriber.poll_once().await.unwrap();
        assert_eq!(summary, PollSummary::default());
    }

    #[tokio::test]
    async fn batch_size_bounds_each_poll() {
        let log = Arc::new(InMemoryEventLog::new());
        for key in ["a", "b", "c"] {
            publish(&log, key, "ok").await;
        }

        let handler = Arc::new(RecordingHandler::default());
        let subscriber = Subscriber::new(log.clone(), "t", "g", handler.clone()).with_batch_size(2);

        assert_eq!(subscriber.poll_once().await.unwrap().handled, 2);
        assert_eq!(log.committed_offset("t", "g").await.unwrap(), Offset::new(2));
        assert_eq!(subscriber.poll_once().await.unwrap().handled, 1);
        assert_eq!(*handler.seen.lock().await, vec!["a", "b", "c"]);

        // Zero is clamped to one fact per poll.
        let single = Subscriber::new(log.clone(), "t", "g2", handler.clone()).with_batch_size(0);
        assert_eq!(single.poll_once().await.unwrap().handled, 1);
    }

    #[tokio::test]
    async fn rejected_facts_are_dropped() {
        let log = Arc::new(InMemoryEventLog::new());
        publish(&log, "a", "bad").await;
        publish(&log, "b", "ok").await;

        let handler = Arc::new(RecordingHandler::default());
        let subscriber = Subscriber::new(log.clone(), "t", "g", handler.clone());

        let summary = subscriber.poll_once().await.unwrap();
        assert_eq!(summary.rejected, 1);
        assert_eq!(summary.handled, 1);
        assert_eq!(*handler.seen.lock().await, vec!["b"]);
        assert_eq!(log.committed_offset("t", "g").await.unwrap(), Offset::new(2));
    }

    #[tokio::test]
    async fn retry_stops_batch_without_committing() {
        let log = Arc::new(InMemoryEventLog::new());
        publish(&log, "a", "flaky").await;
        publish(&log, "b", "ok").await;

        let handler = Arc::new(RecordingHandler::default());
        let subscriber = Subscriber::new(log.clone(), "t", "g", handler.clone());

        let first = subscriber.poll_once().await.unwrap();
        assert!(first.retry_pending);
        assert_eq!(first.committed(), 0);
        assert_eq!(log.committed_offset("t", "g").await.unwrap(), Offset::start());

        let second = subscriber.poll_once().await.unwrap();
        assert_eq!(second.handled, 2);
        assert_eq!(*handler.seen.lock().await, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn groups_consume_independently() {
        let log = Arc::new(InMemoryEventLog::new());
        publish(&log, "a", "ok").await;

        let h1 = Arc::new(RecordingHandler::default());
        let h2 = Arc::new(RecordingHandler::default());
        Subscriber::new(log.clone(), "t", "g1", h1.clone())
            .poll_once()
            .await
            .unwrap();
        Subscriber::new(log.clone(), "t", "g2", h2.clone())
            .poll_once()
            .await
            .unwrap();

        assert_eq!(h1.seen.lock().await.len(), 1);
        assert_eq!(h2.seen.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let log = Arc::new(InMemoryEventLog::new());
        publish(&log, "a", "ok").await;

        let handler = Arc::new(RecordingHandler::default());
        let subscriber = Subscriber::new(log.clone(), "t", "g", handler.clone());
        let (tx, rx) = watch::channel(false);

        let task = tokio::spawn(subscriber.run(Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        task.await.unwrap();

        assert_eq!(*handler.seen.lock().await, vec!["a"]);
    }
}
