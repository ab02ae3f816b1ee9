//! Asinka wire layer.
//!
//! Typed values, object schemas, syncable objects, events, and the
//! top-level protocol messages exchanged between peers.
//!
//! Wire format: MessagePack (compact binary). Every message type has
//! `to_bytes`/`from_bytes`; the transport layer adds length-prefixed
//! framing on top.

pub mod error;
pub mod event;
pub mod message;
pub mod object;
pub mod schema;
pub mod value;

pub use error::WireError;
pub use event::{Event, EventPriority};
pub use message::{
    EventMessage, EventResponse, HandshakeRequest, HandshakeResponse, HeartbeatRequest,
    HeartbeatResponse, ObjectDelete, ObjectUpdate, SealedPayload, SyncMessage,
    SUPPORTED_PROTOCOLS,
};
pub use object::SyncObject;
pub use schema::{FieldDescriptor, FieldKind, ObjectSchema};
pub use value::TaggedValue;

/// Current time as Unix milliseconds.
pub fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time before epoch")
        .as_millis() as u64
}
