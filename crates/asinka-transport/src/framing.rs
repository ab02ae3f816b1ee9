use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{ChannelId, TransportError};

/// Request/response direction of a frame.
///
/// Sync-channel frames are always `Request` (the stream has no
/// per-message replies); correlation ids pair the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Request = 0,
    Response = 1,
}

impl FrameKind {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(FrameKind::Request),
            1 => Some(FrameKind::Response),
            _ => None,
        }
    }
}

/// One wire frame.
///
/// Layout: `[payload len: u32 BE][channel: u8][kind: u8][corr: u32 BE][payload]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub channel: ChannelId,
    pub kind: FrameKind,
    /// Correlation id pairing a response to its request. 0 on the sync channel.
    pub corr: u32,
    pub payload: Vec<u8>,
}

/// Write a frame. Rejects payloads over `max_size` before touching the wire.
pub(crate) async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &Frame,
    max_size: usize,
) -> Result<(), TransportError> {
    if frame.payload.len() > max_size {
        return Err(TransportError::MessageTooLarge {
            size: frame.payload.len(),
            max: max_size,
        });
    }

    let mut header = [0u8; 10];
    header[..4].copy_from_slice(&(frame.payload.len() as u32).to_be_bytes());
    header[4] = frame.channel as u8;
    header[5] = frame.kind as u8;
    header[6..].copy_from_slice(&frame.corr.to_be_bytes());

    writer.write_all(&header).await.map_err(TransportError::Send)?;
    writer
        .write_all(&frame.payload)
        .await
        .map_err(TransportError::Send)?;
    writer.flush().await.map_err(TransportError::Send)?;
    Ok(())
}

/// Read one frame, enforcing `max_size` against the declared length.
pub(crate) async fn read_frame<R: AsyncRead + Unpin>(
    reader: &mut R,
    max_size: usize,
) -> Result<Frame, TransportError> {
    let mut header = [0u8; 10];
    reader
        .read_exact(&mut header)
        .await
        .map_err(TransportError::Receive)?;

    let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
    if len > max_size {
        return Err(TransportError::MessageTooLarge {
            size: len,
            max: max_size,
        });
    }

    let channel = ChannelId::from_u8(header[4]).ok_or(TransportError::InvalidChannel(header[4]))?;
    let kind = FrameKind::from_u8(header[5]).ok_or(TransportError::InvalidKind(header[5]))?;
    let corr = u32::from_be_bytes([header[6], header[7], header[8], header[9]]);

    let mut payload = vec![0u8; len];
    reader
        .read_exact(&mut payload)
        .await
        .map_err(TransportError::Receive)?;

    Ok(Frame {
        channel,
        kind,
        corr,
        payload,
    })
}
