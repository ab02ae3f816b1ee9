//! Asinka: peer-to-peer LAN object synchronization and events.
//!
//! Cooperating processes on one local network share a live set of
//! versioned objects and a stream of typed events. Each peer
//! advertises itself, discovers others, performs a handshake, and
//! keeps long-lived encrypted streams over which changes flow in near
//! real time.
//!
//! Conflict resolution is last-writer-wins by version number; the
//! version gate accepts a replacing value iff its version is strictly
//! greater. There is no consensus, no persistence, and no WAN story;
//! objects live in the memory of running peers.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use asinka::{AsinkaClient, AsinkaConfig};
//! use asinka_wire::{FieldKind, ObjectSchema, SyncObject};
//!
//! # async fn example() -> Result<(), asinka::AsinkaError> {
//! let client = AsinkaClient::create(
//!     AsinkaConfig::new("com.example.tasks")
//!         .app_name("tasks")
//!         .schema(
//!             ObjectSchema::new("Task", "1")
//!                 .field("title", FieldKind::String)
//!                 .field("completed", FieldKind::Bool),
//!         ),
//! )?;
//! client.start().await?;
//!
//! client.registry().register(
//!     SyncObject::new("t1", "Task")
//!         .with_field("title", "buy milk")
//!         .with_field("completed", false),
//! );
//!
//! client.stop().await;
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod config;
pub mod discovery;
pub mod error;
pub mod events;
pub mod handshake;
pub mod registry;
pub mod security;
pub mod session;

pub use client::AsinkaClient;
pub use config::AsinkaConfig;
pub use error::AsinkaError;
pub use events::{EventBus, EventReceiver, EventStream};
pub use registry::{ChangeStream, ObjectChange, ObjectRegistry};
pub use security::{SecurityEnvelope, SessionKey};
pub use session::{SessionInfo, SessionPhase};

pub use asinka_wire::{
    Event, EventPriority, FieldDescriptor, FieldKind, ObjectSchema, SyncObject, TaggedValue,
};
