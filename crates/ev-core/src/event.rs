use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::id;
use crate::payload::Payload;

/// A stored record: time-sortable id, topic tag, and payload.
///
/// The id is the only ordering authority; `time()` is derived from it, not
/// stored separately. Topic semantics are plain equality; hierarchical or
/// wildcard matching belongs to transport adapters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Ulid,
    pub topic: String,
    pub payload: Payload,
}

impl Event {
    /// New event with a freshly generated id.
    pub fn new(topic: impl Into<String>, payload: Payload) -> Self {
        Self::with_id(id::make(), topic, payload)
    }

    /// New event with a caller-supplied id.
    pub fn with_id(id: Ulid, topic: impl Into<String>, payload: Payload) -> Self {
        Self {
            id,
            topic: topic.into(),
            payload,
        }
    }

    /// The millisecond timestamp embedded in the event id.
    pub fn time(&self) -> DateTime<Utc> {
        id::timestamp(self.id)
    }
}
