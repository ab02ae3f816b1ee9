use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::framing::{read_frame, write_frame, Frame, FrameKind};
use crate::{ChannelId, TransportError};

/// Something the remote side sent us.
#[derive(Debug)]
pub enum Inbound {
    /// A message on the free-running sync stream.
    Sync(Vec<u8>),
    /// A unary request awaiting a [`ConnectionHandle::respond`].
    Request {
        channel: ChannelId,
        corr: u32,
        payload: Vec<u8>,
    },
}

struct Shared {
    /// In-flight unary calls keyed by correlation id.
    pending: Mutex<HashMap<u32, oneshot::Sender<Vec<u8>>>>,
    next_corr: AtomicU32,
}

/// Cloneable write-side handle to a connection.
///
/// Responses are paired to calls by correlation id, so any number of
/// tasks may call concurrently. Closing cancels the demux task and
/// fails all in-flight calls with [`TransportError::Closed`].
#[derive(Clone)]
pub struct ConnectionHandle {
    peer_addr: SocketAddr,
    writer: Arc<tokio::sync::Mutex<OwnedWriteHalf>>,
    shared: Arc<Shared>,
    cancel: CancellationToken,
    max_message_size: usize,
    call_deadline: Duration,
}

impl ConnectionHandle {
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Close the connection. Idempotent.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    /// A token that resolves when the connection dies, whichever side
    /// closes it first.
    pub fn closed_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn write(&self, frame: Frame) -> Result<(), TransportError> {
        if self.cancel.is_cancelled() {
            return Err(TransportError::Closed);
        }
        let mut writer = self.writer.lock().await;
        write_frame(&mut *writer, &frame, self.max_message_size).await
    }

    /// Send a message on the sync stream. No reply expected.
    pub async fn send_sync(&self, payload: Vec<u8>) -> Result<(), TransportError> {
        self.write(Frame {
            channel: ChannelId::Sync,
            kind: FrameKind::Request,
            corr: 0,
            payload,
        })
        .await
    }

    /// Unary call: send a request and await the paired response.
    ///
    /// `deadline` defaults to the configured call deadline.
    pub async fn call(
        &self,
        channel: ChannelId,
        payload: Vec<u8>,
        deadline: Option<Duration>,
    ) -> Result<Vec<u8>, TransportError> {
        let corr = self.shared.next_corr.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.shared.pending.lock().insert(corr, tx);

        if let Err(e) = self
            .write(Frame {
                channel,
                kind: FrameKind::Request,
                corr,
                payload,
            })
            .await
        {
            self.shared.pending.lock().remove(&corr);
            return Err(e);
        }

        let deadline = deadline.unwrap_or(self.call_deadline);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(payload)) => Ok(payload),
            Ok(Err(_)) => Err(TransportError::Closed),
            Err(_) => {
                self.shared.pending.lock().remove(&corr);
                Err(TransportError::DeadlineExceeded)
            }
        }
    }

    /// Answer a unary request received as [`Inbound::Request`].
    pub async fn respond(
        &self,
        channel: ChannelId,
        corr: u32,
        payload: Vec<u8>,
    ) -> Result<(), TransportError> {
        self.write(Frame {
            channel,
            kind: FrameKind::Response,
            corr,
            payload,
        })
        .await
    }
}

/// One multiplexed connection to a peer.
///
/// Owns the demux task reading frames off the socket: sync messages
/// and inbound requests surface through the inbound queue, responses
/// resolve their pending call.
pub struct Connection {
    handle: ConnectionHandle,
    inbound: mpsc::Receiver<Inbound>,
}

impl Connection {
    /// Dial a peer.
    pub async fn connect(
        addr: SocketAddr,
        config: &TransportConfig,
    ) -> Result<Self, TransportError> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| TransportError::Connect { addr, source: e })?;
        Ok(Self::from_stream(stream, config))
    }

    /// Wrap an accepted stream.
    pub fn from_stream(stream: TcpStream, config: &TransportConfig) -> Self {
        let peer_addr = stream
            .peer_addr()
            .unwrap_or_else(|_| SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)));
        let _ = stream.set_nodelay(true);

        let (read_half, write_half) = stream.into_split();
        let cancel = CancellationToken::new();
        let shared = Arc::new(Shared {
            pending: Mutex::new(HashMap::new()),
            next_corr: AtomicU32::new(1),
        });
        let (inbound_tx, inbound_rx) = mpsc::channel(config.recv_buffer);

        tokio::spawn(demux_loop(
            read_half,
            Arc::clone(&shared),
            inbound_tx,
            cancel.clone(),
            config.max_message_size,
            config.idle_timeout,
        ));

        Self {
            handle: ConnectionHandle {
                peer_addr,
                writer: Arc::new(tokio::sync::Mutex::new(write_half)),
                shared,
                cancel,
                max_message_size: config.max_message_size,
                call_deadline: config.call_deadline,
            },
            inbound: inbound_rx,
        }
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.handle.peer_addr
    }

    pub fn handle(&self) -> ConnectionHandle {
        self.handle.clone()
    }

    /// Next inbound item; `None` once the connection is closed.
    pub async fn next_inbound(&mut self) -> Option<Inbound> {
        self.inbound.recv().await
    }

    /// Split into a cloneable write handle and the inbound queue.
    pub fn into_parts(self) -> (ConnectionHandle, mpsc::Receiver<Inbound>) {
        (self.handle, self.inbound)
    }
}

async fn demux_loop(
    mut reader: OwnedReadHalf,
    shared: Arc<Shared>,
    inbound_tx: mpsc::Sender<Inbound>,
    cancel: CancellationToken,
    max_message_size: usize,
    idle_timeout: Duration,
) {
    loop {
        let frame = tokio::select! {
            _ = cancel.cancelled() => break,
            result = tokio::time::timeout(idle_timeout, read_frame(&mut reader, max_message_size)) => {
                match result {
                    Err(_) => {
                        tracing::debug!("connection idle for {idle_timeout:?}, closing");
                        break;
                    }
                    Ok(Err(e)) => {
                        tracing::debug!("connection read ended: {e}");
                        break;
                    }
                    Ok(Ok(frame)) => frame,
                }
            }
        };

        match frame.channel {
            ChannelId::Sync => {
                if inbound_tx.send(Inbound::Sync(frame.payload)).await.is_err() {
                    break;
                }
            }
            channel => match frame.kind {
                FrameKind::Response => {
                    if let Some(tx) = shared.pending.lock().remove(&frame.corr) {
                        let _ = tx.send(frame.payload);
                    }
                }
                FrameKind::Request => {
                    let request = Inbound::Request {
                        channel,
                        corr: frame.corr,
                        payload: frame.payload,
                    };
                    if inbound_tx.send(request).await.is_err() {
                        break;
                    }
                }
            },
        }
    }

    // Fail in-flight calls and wake everyone watching the token.
    cancel.cancel();
    shared.pending.lock().clear();
}
