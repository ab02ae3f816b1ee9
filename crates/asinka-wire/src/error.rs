/// Errors produced by the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),
}

impl From<rmp_serde::encode::Error> for WireError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        WireError::Encode(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for WireError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        WireError::Decode(e.to_string())
    }
}
