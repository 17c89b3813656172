//! Event types for the runtime

use ceplite_core::Value;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use rustc_hash::FxBuildHasher;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Type alias for IndexMap with FxBuildHasher for faster hashing of event fields.
pub type FxIndexMap<K, V> = IndexMap<K, V, FxBuildHasher>;

/// Field map of an event or result row.
pub type Fields = FxIndexMap<String, Value>;

/// A shared reference to an Event.
///
/// Windows, pattern state and join buffers all hold the same allocation, so
/// an event accepted by several queries is never deep-copied.
pub type SharedEvent = Arc<Event>;

/// A runtime event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Event type name (Arc<str> for O(1) clone instead of O(n) String clone)
    pub event_type: Arc<str>,
    /// Timestamp supplied by the producer
    pub timestamp: DateTime<Utc>,
    /// Arrival sequence number assigned by the engine at ingestion
    pub seq: u64,
    /// Event payload
    pub data: Fields,
}

impl Event {
    pub fn new(event_type: impl Into<Arc<str>>) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp: Utc::now(),
            seq: 0,
            data: IndexMap::with_hasher(FxBuildHasher),
        }
    }

    /// Creates a new event from a pre-built field map.
    pub fn from_fields(
        event_type: impl Into<Arc<str>>,
        timestamp: DateTime<Utc>,
        seq: u64,
        data: Fields,
    ) -> Self {
        Self {
            event_type: event_type.into(),
            timestamp,
            seq,
            data,
        }
    }

    pub fn with_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.timestamp = ts;
        self
    }

    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = seq;
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    pub fn get_float(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(|v| v.as_float())
    }

    pub fn get_int(&self, key: &str) -> Option<i64> {
        self.data.get(key).and_then(|v| v.as_int())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(|v| v.as_str())
    }
}

/// Build a [`Fields`] map from `(name, value)` pairs.
///
/// ```rust
/// use ceplite_runtime::event::fields;
///
/// let f = fields([("key", "apple".into()), ("closing", 12.5.into())]);
/// assert_eq!(f.len(), 2);
/// ```
pub fn fields<K, I>(pairs: I) -> Fields
where
    K: Into<String>,
    I: IntoIterator<Item = (K, Value)>,
{
    pairs.into_iter().map(|(k, v)| (k.into(), v)).collect()
}
