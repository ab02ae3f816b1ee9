/// Errors surfaced by the asinka core.
///
/// Version-stale updates and observer buffer overflows are deliberately
/// not here: the former is a silent drop by the version gate, the
/// latter a diagnostic counter on the affected stream.
#[derive(Debug, thiserror::Error)]
pub enum AsinkaError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("crypto failure: {0}")]
    Crypto(String),

    #[error("discovery error {code}: {message}")]
    Discovery { code: i32, message: String },

    #[error("transport error: {0}")]
    Transport(#[from] asinka_transport::TransportError),

    #[error("wire error: {0}")]
    Wire(#[from] asinka_wire::WireError),

    #[error("handshake refused: {0}")]
    HandshakeRefused(String),

    #[error("unknown session: {0}")]
    UnknownSession(String),
}
