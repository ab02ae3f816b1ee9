//! Asinka transport layer.
//!
//! Length-prefixed frames over TCP, multiplexing four logical channels
//! (handshake, sync stream, event, heartbeat) on one connection. The
//! handshake and heartbeat channels are unary request/response; the
//! sync channel is a free-running bidirectional stream; the event
//! channel is unary per event.
//!
//! Payload bytes are opaque here; the protocol layer encrypts and
//! encodes them. If the framing ever changes (e.g. to an HTTP/2 RPC
//! binding), the `Connection`/`TransportServer` surface stays put.

mod config;
mod connection;
mod error;
mod framing;
mod server;

pub use config::TransportConfig;
pub use connection::{Connection, ConnectionHandle, Inbound};
pub use error::TransportError;
pub use framing::{Frame, FrameKind};
pub use server::TransportServer;

/// The four logical channels multiplexed over one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelId {
    Handshake = 0,
    Sync = 1,
    Event = 2,
    Heartbeat = 3,
}

impl ChannelId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(ChannelId::Handshake),
            1 => Some(ChannelId::Sync),
            2 => Some(ChannelId::Event),
            3 => Some(ChannelId::Heartbeat),
            _ => None,
        }
    }
}
