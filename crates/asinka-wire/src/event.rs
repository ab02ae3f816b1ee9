use std::collections::HashMap;

use serde::de::Error as _;
use serde::{Deserialize, Serialize};

use crate::value::TaggedValue;
use crate::now_ms;

/// Event priority. Encoded as an integer on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum EventPriority {
    Low = 0,
    Normal = 1,
    High = 2,
    Urgent = 3,
}

impl EventPriority {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(EventPriority::Low),
            1 => Some(EventPriority::Normal),
            2 => Some(EventPriority::High),
            3 => Some(EventPriority::Urgent),
            _ => None,
        }
    }
}

impl Serialize for EventPriority {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for EventPriority {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        EventPriority::from_u8(raw)
            .ok_or_else(|| D::Error::custom(format!("invalid event priority: {raw}")))
    }
}

/// An in-transit, non-persisted typed message.
///
/// Events flow through the bus and are dropped after dispatch; nothing
/// stores them. `origin_session` is empty for locally sent events and
/// carries the inbound session id for remote ones, so the fan-out pump
/// never echoes a remote event back out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    /// Generated unique id (UUID v4).
    pub event_id: String,
    pub event_type: String,
    /// Unix milliseconds.
    pub timestamp_ms: u64,
    pub data: HashMap<String, TaggedValue>,
    pub priority: EventPriority,
    /// Session id the event arrived on; empty when local.
    pub origin_session: String,
}

impl Event {
    /// Create a local event at `Normal` priority.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            event_type: event_type.into(),
            timestamp_ms: now_ms(),
            data: HashMap::new(),
            priority: EventPriority::Normal,
            origin_session: String::new(),
        }
    }

    pub fn with_data(mut self, name: impl Into<String>, value: impl Into<TaggedValue>) -> Self {
        self.data.insert(name.into(), value.into());
        self
    }

    pub fn with_priority(mut self, priority: EventPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn data_value(&self, name: &str) -> Option<&TaggedValue> {
        self.data.get(name)
    }
}
