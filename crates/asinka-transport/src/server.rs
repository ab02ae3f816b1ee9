use std::net::SocketAddr;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::TransportConfig;
use crate::connection::Connection;
use crate::TransportError;

/// Listening side of the transport.
///
/// Accepted connections surface through [`TransportServer::accept`];
/// the session layer runs the handshake on each before it becomes a
/// session.
pub struct TransportServer {
    local_addr: SocketAddr,
    incoming: mpsc::Receiver<Connection>,
    cancel: CancellationToken,
    accept_task: JoinHandle<()>,
    drain: Duration,
}

impl TransportServer {
    /// Bind and start accepting. Port 0 picks an ephemeral port;
    /// read it back via [`TransportServer::local_addr`].
    pub async fn bind(addr: SocketAddr, config: TransportConfig) -> Result<Self, TransportError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| TransportError::Bind { addr, source: e })?;
        let local_addr = listener
            .local_addr()
            .map_err(|e| TransportError::Bind { addr, source: e })?;

        let cancel = CancellationToken::new();
        let (incoming_tx, incoming_rx) = mpsc::channel(64);
        let drain = config.shutdown_drain;

        let accept_task = tokio::spawn(accept_loop(
            listener,
            config,
            incoming_tx,
            cancel.clone(),
        ));

        Ok(Self {
            local_addr,
            incoming: incoming_rx,
            cancel,
            accept_task,
            drain,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Next accepted connection; `None` after shutdown.
    pub async fn accept(&mut self) -> Option<Connection> {
        self.incoming.recv().await
    }

    /// Stop accepting and wait for the accept loop within the drain budget.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        if tokio::time::timeout(self.drain, self.accept_task)
            .await
            .is_err()
        {
            tracing::warn!("accept loop did not drain within {:?}", self.drain);
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    config: TransportConfig,
    incoming_tx: mpsc::Sender<Connection>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok((stream, peer)) => {
                    tracing::debug!("accepted connection from {peer}");
                    let connection = Connection::from_stream(stream, &config);
                    if incoming_tx.send(connection).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    tracing::warn!("accept failed: {e}");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}
