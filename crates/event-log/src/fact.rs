use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{EventLogError, FactId, Result};

/// Position of a fact within its topic.
///
/// The first fact published on a topic has offset 1. Offset 0 means
/// "before the first fact" and is the committed offset of a consumer group
/// that has not consumed anything yet.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Offset(i64);

impl Offset {
    /// Creates an offset from a raw value.
    pub fn new(value: i64) -> Self {
        Self(value)
    }

    /// The offset preceding every fact of a topic.
    pub fn start() -> Self {
        Self(0)
    }

    /// Returns the next offset.
    pub fn next(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Returns the raw offset value.
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for Offset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for Offset {
    fn from(value: i64) -> Self {
        Self(value)
    }
}

/// A fact as stored on the log, together with its position and metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FactEnvelope {
    /// Unique identifier of this fact.
    pub fact_id: FactId,

    /// Topic the fact was published on (e.g. "order-created").
    pub topic: String,

    /// Partitioning key, usually the id of the entity the fact is about.
    pub key: String,

    /// Offset assigned by the log at publish time.
    pub offset: Offset,

    /// The kind of fact (e.g. "OrderCreated").
    pub fact_type: String,

    /// When the log accepted the fact.
    pub published_at: DateTime<Utc>,

    /// The fact body as JSON.
    pub payload: serde_json::Value,

    /// Free-form headers (correlation ids, producer name, ...).
    pub headers: HashMap<String, serde_json::Value>,
}

impl FactEnvelope {
    /// Deserializes the payload into a typed fact.
    pub fn decode<T: serde::de::DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// A fact that has not been published yet; the log assigns its offset.
#[derive(Debug, Clone)]
pub struct NewFact {
    pub fact_id: FactId,
    pub topic: String,
    pub key: String,
    pub fact_type: String,
    pub payload: serde_json::Value,
    pub headers: HashMap<String, serde_json::Value>,
}

impl NewFact {
    /// Creates a new fact builder.
    pub fn builder() -> NewFactBuilder {
        NewFactBuilder::default()
    }

    /// Stamps this fact with its position on the log.
    pub(crate) fn into_envelope(self, offset: Offset, published_at: DateTime<Utc>) -> FactEnvelope {
        FactEnvelope {
            fact_id: self.fact_id,
            topic: self.topic,
            key: self.key,
            offset,
            fact_type: self.fact_type,
            published_at,
            payload: self.payload,
            headers: self.headers,
        }
    }
}

/// Builder for [`NewFact`].
#[derive(Debug, Default)]
pub struct NewFactBuilder {
    fact_id: Option<FactId>,
    topic: Option<String>,
    key: Option<String>,
    fact_type: Option<String>,
    payload: Option<serde_json::Value>,
    headers: HashMap<String, serde_json::Value>,
}

impl NewFactBuilder {
    /// Sets the fact ID. If not set, a new ID is generated.
    pub fn fact_id(mut self, id: FactId) -> Self {
        self.fact_id = Some(id);
        self
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = Some(topic.into());
        self
    }

    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn fact_type(mut self, fact_type: impl Into<String>) -> Self {
        self.fact_type = Some(fact_type.into());
        self
    }

    /// Sets the payload from a serializable value.
    pub fn payload<T: Serialize + ?Sized>(mut self, payload: &T) -> Result<Self> {
        self.payload = Some(serde_json::to_value(payload)?);
        Ok(self)
    }

    /// Sets the payload from a raw JSON value.
    pub fn payload_raw(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Adds a header entry.
    pub fn header(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.headers.insert(key.into(), value);
        self
    }

    /// Builds the fact, failing if topic, key, fact type or payload is missing.
    pub fn build(self) -> Result<NewFact> {
        let topic = self
            .topic
            .filter(|t| !t.is_empty())
            .ok_or_else(|| EventLogError::InvalidFact("topic is required".to_string()))?;
        let key = self
            .key
            .ok_or_else(|| EventLogError::InvalidFact("key is required".to_string()))?;
        let fact_type = self
            .fact_type
            .ok_or_else(|| EventLogError::InvalidFact("fact_type is required".to_string()))?;
        let payload = self
            .payload
            .ok_or_else(|| EventLogError::InvalidFact("payload is required".to_string()))?;

        Ok(NewFact {
            fact_id: self.fact_id.unwrap_or_default(),
            topic,
            key,
            fact_type,
            payload,
            headers: self.headers,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_ordering() {
        assert!(Offset::start() < Offset::new(1));
        assert_eq!(Offset::start().next(), Offset::new(1));
    }

    #[test]
    fn builder_collects_all_fields() {
        let fact = NewFact::builder()
            .topic("order-created")
            .key("abc")
            .fact_type("OrderCreated")
            .payload_raw(serde_json::json!({"total": "10.00"}))
            .header("producer", serde_json::json!("order-intake"))
            .build()
            .unwrap();

        assert_eq!(fact.topic, "order-created");
        assert_eq!(fact.key, "abc");
        assert_eq!(fact.fact_type, "OrderCreated");
        assert_eq!(fact.payload["total"], "10.00");
        assert_eq!(
            fact.headers.get("producer"),
            Some(&serde_json::json!("order-intake"))
        );
    }

    #[test]
    fn builder_rejects_missing_topic() {
        let err = NewFact::builder()
            .key("abc")
            .fact_type("OrderCreated")
            .payload_raw(serde_json::json!({}))
            .build()
            .unwrap_err();
        assert!(matches!(err, EventLogError::InvalidFact(_)));
    }

    #[test]
    fn envelope_decodes_typed_payload() {
        #[derive(Deserialize)]
        struct Body {
            total: String,
        }

        let envelope = NewFact::builder()
            .topic("t")
            .key("k")
            .fact_type("T")
            .payload_raw(serde_json::json!({"total": "3.50"}))
            .build()
            .unwrap()
            .into_envelope(Offset::new(1), Utc::now());

        let body: Body = envelope.decode().unwrap();
        assert_eq!(body.total, "3.50");
    }
}
