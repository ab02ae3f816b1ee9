/// Top-level protocol messages.
///
/// Four message families cross the wire: handshake request/response,
/// sync messages (object update / delete), event messages, and
/// heartbeats. Post-handshake sync and event payloads travel inside a
/// [`SealedPayload`] under the session key.
use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::WireError;
use crate::event::{Event, EventPriority};
use crate::now_ms;
use crate::object::SyncObject;
use crate::schema::ObjectSchema;
use crate::value::TaggedValue;

/// Protocol versions this implementation speaks, newest first.
pub const SUPPORTED_PROTOCOLS: &[&str] = &["asinka-v1"];

macro_rules! msgpack_codec {
    ($ty:ty) => {
        impl $ty {
            /// Serialize to MessagePack bytes.
            pub fn to_bytes(&self) -> Result<Vec<u8>, WireError> {
                rmp_serde::to_vec(self).map_err(Into::into)
            }

            /// Deserialize from MessagePack bytes.
            pub fn from_bytes(data: &[u8]) -> Result<Self, WireError> {
                rmp_serde::from_slice(data).map_err(Into::into)
            }
        }
    };
}

// ── Handshake ────────────────────────────────────────────────────────

/// Opening message of a session: who we are and what we speak.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeRequest {
    pub app_id: String,
    pub app_name: String,
    pub app_version: String,
    pub device_id: String,
    /// RSA public key, PKCS#1 DER.
    pub identity_public_key: Vec<u8>,
    pub supported_protocols: Vec<String>,
    pub exposed_schemas: Vec<ObjectSchema>,
    pub capabilities: HashMap<String, String>,
}

/// Answer from the accepting side.
///
/// On success the accepting side mints the session id and the session
/// key; the key travels RSA-OAEP-wrapped to the requester's identity
/// key in `sealed_session_key`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeResponse {
    pub success: bool,
    pub session_id: String,
    /// RSA public key, PKCS#1 DER.
    pub identity_public_key: Vec<u8>,
    pub exposed_schemas: Vec<ObjectSchema>,
    pub capabilities: HashMap<String, String>,
    /// 256-bit session key, RSA-OAEP-SHA-256 wrapped. Empty on refusal.
    pub sealed_session_key: Vec<u8>,
    /// Human-readable refusal reason. Empty on success.
    pub error: String,
}

impl HandshakeResponse {
    /// A refusal carrying only the reason.
    pub fn refused(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            session_id: String::new(),
            identity_public_key: Vec::new(),
            exposed_schemas: Vec::new(),
            capabilities: HashMap::new(),
            sealed_session_key: Vec::new(),
            error: reason.into(),
        }
    }
}

// ── Sync ─────────────────────────────────────────────────────────────

/// A full object value, replicated to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectUpdate {
    pub object_id: String,
    pub type_name: String,
    pub version: u32,
    pub timestamp_ms: u64,
    pub fields: HashMap<String, TaggedValue>,
    /// Session id of the sender; becomes the receiver's origin session.
    pub session_id: String,
}

impl ObjectUpdate {
    /// Stamp an outbound update from a registry snapshot.
    pub fn from_object(object: &SyncObject, session_id: impl Into<String>) -> Self {
        Self {
            object_id: object.object_id.clone(),
            type_name: object.type_name.clone(),
            version: object.version,
            timestamp_ms: now_ms(),
            fields: object.fields.clone(),
            session_id: session_id.into(),
        }
    }

    /// Convert to the object the receiving registry would store.
    pub fn into_object(self) -> SyncObject {
        SyncObject {
            object_id: self.object_id,
            type_name: self.type_name,
            version: self.version,
            fields: self.fields,
            origin_session: self.session_id,
        }
    }
}

/// Removal of an object. Idempotent on the receiving side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectDelete {
    pub object_id: String,
    pub type_name: String,
    pub timestamp_ms: u64,
    pub session_id: String,
}

impl ObjectDelete {
    pub fn new(
        object_id: impl Into<String>,
        type_name: impl Into<String>,
        session_id: impl Into<String>,
    ) -> Self {
        Self {
            object_id: object_id.into(),
            type_name: type_name.into(),
            timestamp_ms: now_ms(),
            session_id: session_id.into(),
        }
    }
}

/// The sync-channel payload: update or delete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SyncMessage {
    Update(ObjectUpdate),
    Delete(ObjectDelete),
}

// ── Events ───────────────────────────────────────────────────────────

/// A typed event in transit between peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventMessage {
    pub event_id: String,
    pub event_type: String,
    pub timestamp_ms: u64,
    pub data: HashMap<String, TaggedValue>,
    pub session_id: String,
    pub priority: EventPriority,
}

impl EventMessage {
    /// Stamp an outbound message from a local event.
    pub fn from_event(event: &Event, session_id: impl Into<String>) -> Self {
        Self {
            event_id: event.event_id.clone(),
            event_type: event.event_type.clone(),
            timestamp_ms: event.timestamp_ms,
            data: event.data.clone(),
            session_id: session_id.into(),
            priority: event.priority,
        }
    }

    /// Convert to a bus event, recording the session it arrived on.
    pub fn into_event(self, origin_session: impl Into<String>) -> Event {
        Event {
            event_id: self.event_id,
            event_type: self.event_type,
            timestamp_ms: self.timestamp_ms,
            data: self.data,
            priority: self.priority,
            origin_session: origin_session.into(),
        }
    }
}

/// Acknowledgement for a unary event send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventResponse {
    pub success: bool,
    pub event_id: String,
}

// ── Heartbeat ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub session_id: String,
    pub timestamp_ms: u64,
}

/// The server side always answers `success = true` with its clock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeartbeatResponse {
    pub success: bool,
    pub server_timestamp_ms: u64,
}

// ── Sealed payload ───────────────────────────────────────────────────

/// AEAD container for encrypted sync/event payloads.
///
/// AES-256-GCM under the session key; the 12-byte nonce is generated
/// fresh per message and must never repeat for the same key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedPayload {
    /// 96-bit GCM nonce.
    pub nonce: [u8; 12],
    /// Ciphertext including the 16-byte auth tag.
    pub ciphertext: Vec<u8>,
}

msgpack_codec!(HandshakeRequest);
msgpack_codec!(HandshakeResponse);
msgpack_codec!(SyncMessage);
msgpack_codec!(EventMessage);
msgpack_codec!(EventResponse);
msgpack_codec!(HeartbeatRequest);
msgpack_codec!(HeartbeatResponse);
msgpack_codec!(SealedPayload);
