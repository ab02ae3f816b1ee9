use std::net::SocketAddr;

/// Errors returned by the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("connection to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("send failed: {0}")]
    Send(#[source] std::io::Error),

    #[error("receive failed: {0}")]
    Receive(#[source] std::io::Error),

    #[error("message too large: {size} bytes (max {max})")]
    MessageTooLarge { size: usize, max: usize },

    #[error("invalid channel byte: {0}")]
    InvalidChannel(u8),

    #[error("invalid frame kind byte: {0}")]
    InvalidKind(u8),

    #[error("call deadline exceeded")]
    DeadlineExceeded,

    #[error("connection closed")]
    Closed,
}
