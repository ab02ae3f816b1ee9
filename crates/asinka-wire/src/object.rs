use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::value::TaggedValue;

/// A versioned, replicated record of typed fields.
///
/// The version is the sole reconciliation primitive: a replacing value
/// is accepted iff its version is strictly greater than the stored one.
/// `origin_session` names the session the current value was received on;
/// empty for locally authored values. The outbound pump uses it to avoid
/// echoing a change back to the peer it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncObject {
    /// Globally unique, application-chosen id.
    pub object_id: String,
    /// Declared type name; may be unknown locally.
    pub type_name: String,
    /// Monotonic; starts at 1, bumped on every local mutation.
    pub version: u32,
    pub fields: HashMap<String, TaggedValue>,
    /// Session id the current value arrived on; empty when local.
    pub origin_session: String,
}

impl SyncObject {
    /// Create a fresh, locally authored object at version 1.
    pub fn new(object_id: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self {
            object_id: object_id.into(),
            type_name: type_name.into(),
            version: 1,
            fields: HashMap::new(),
            origin_session: String::new(),
        }
    }

    /// Set a field (builder style).
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<TaggedValue>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<TaggedValue>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn field(&self, name: &str) -> Option<&TaggedValue> {
        self.fields.get(name)
    }

    /// Whether the current value was authored locally.
    pub fn is_local(&self) -> bool {
        self.origin_session.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: &str) -> SyncObject {
        SyncObject::new(id, "Task")
            .with_field("title", "buy milk")
            .with_field("completed", false)
    }

    #[test]
    fn new_starts_at_version_one() {
        let obj = task("t1");
        assert_eq!(obj.version, 1);
        assert!(obj.is_local());
        assert_eq!(obj.field("title").unwrap().as_str(), Some("buy milk"));
    }

    #[test]
    fn missing_field_reads_absent() {
        assert!(task("t1").field("priority").is_none());
    }

    #[test]
    fn set_field_overwrites() {
        let mut obj = task("t1");
        obj.set_field("completed", true);
        assert_eq!(obj.field("completed").unwrap().as_bool(), Some(true));
        assert_eq!(obj.fields.len(), 2);
    }

    #[test]
    fn roundtrip_msgpack() {
        let obj = task("t1").with_field("payload", vec![7u8; 16]);
        let bytes = rmp_serde::to_vec(&obj).expect("serialize");
        let decoded: SyncObject = rmp_serde::from_slice(&bytes).expect("deserialize");
        assert_eq!(obj, decoded);
    }

    #[test]
    fn remote_origin_not_local() {
        let mut obj = task("t1");
        obj.origin_session = "sess-1".into();
        assert!(!obj.is_local());
    }
}
