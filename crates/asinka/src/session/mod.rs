/// Session management: one entry per handshaken peer.
///
/// A session is born from either an outbound dial or an accepted
/// connection, lives in the shared session table while `Active`, and
/// owns three tasks: the outbound change pump, the inbound pump, and
/// the heartbeat ticker. Cancelling the session token tears all three
/// down along with the connection.
mod worker;

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use asinka_transport::{ChannelId, Connection, ConnectionHandle, Inbound};
use asinka_wire::{now_ms, Event, HandshakeRequest, HandshakeResponse, ObjectSchema};

use crate::config::AsinkaConfig;
use crate::error::AsinkaError;
use crate::events::EventBus;
use crate::handshake::{self, HandshakeSuccess};
use crate::registry::ObjectRegistry;
use crate::security::{SecurityEnvelope, SessionKey};

/// Where a session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Connecting,
    HandshakingOut,
    HandshakingIn,
    Active,
    Closing,
    Failed,
}

/// Snapshot of one session.
#[derive(Debug, Clone)]
pub struct SessionInfo {
    /// Minted by the accepting side at handshake; shared by both ends.
    pub session_id: String,
    /// Remote identity public key, PKCS#1 DER.
    pub remote_public_key: Vec<u8>,
    pub remote_schemas: Vec<ObjectSchema>,
    pub remote_capabilities: HashMap<String, String>,
    pub remote_addr: SocketAddr,
    pub phase: SessionPhase,
    pub last_heartbeat_ms: u64,
}

struct SessionEntry {
    info: SessionInfo,
    key: SessionKey,
    handle: ConnectionHandle,
    cancel: CancellationToken,
}

/// Owns the session table and wires transport ⇄ registry ⇄ event bus
/// ⇄ security for every peer.
pub struct SessionManager {
    pub(crate) config: AsinkaConfig,
    pub(crate) registry: Arc<ObjectRegistry>,
    pub(crate) events: Arc<EventBus>,
    pub(crate) security: Arc<SecurityEnvelope>,
    sessions: RwLock<HashMap<String, SessionEntry>>,
    /// Outbound dials in flight, to suppress duplicate auto-connects.
    dialing: Mutex<HashSet<SocketAddr>>,
}

impl SessionManager {
    pub(crate) fn new(
        config: AsinkaConfig,
        registry: Arc<ObjectRegistry>,
        events: Arc<EventBus>,
        security: Arc<SecurityEnvelope>,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            registry,
            events,
            security,
            sessions: RwLock::new(HashMap::new()),
            dialing: Mutex::new(HashSet::new()),
        })
    }

    /// Dial a peer and run the outbound handshake.
    pub async fn connect(
        self: &Arc<Self>,
        host: &str,
        port: u16,
    ) -> Result<SessionInfo, AsinkaError> {
        let addr = resolve(host, port).await?;

        if self.known_peer(addr) {
            return Err(AsinkaError::HandshakeRefused(format!(
                "already connected or dialing {addr}"
            )));
        }
        self.dialing.lock().insert(addr);
        let result = self.connect_inner(addr).await;
        self.dialing.lock().remove(&addr);
        result
    }

    async fn connect_inner(self: &Arc<Self>, addr: SocketAddr) -> Result<SessionInfo, AsinkaError> {
        tracing::debug!(peer = %addr, phase = ?SessionPhase::Connecting, "dialing");
        let connection = Connection::connect(addr, &self.config.transport).await?;
        let (handle, inbound) = connection.into_parts();

        tracing::debug!(peer = %addr, phase = ?SessionPhase::HandshakingOut, "sending handshake");
        let request = handshake::build_request(&self.config, &self.security);
        let response_bytes = match handle
            .call(ChannelId::Handshake, request.to_bytes()?, None)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                handle.close();
                return Err(e.into());
            }
        };

        let response = HandshakeResponse::from_bytes(&response_bytes)?;
        let success = match handshake::validate_response(response, &self.security) {
            Ok(success) => success,
            Err(e) => {
                tracing::debug!(peer = %addr, phase = ?SessionPhase::Failed, "handshake failed");
                handle.close();
                return Err(e);
            }
        };

        Ok(self.activate(success, handle, inbound, addr))
    }

    /// Run the accepting side of the handshake on a fresh connection.
    pub(crate) async fn accept(self: &Arc<Self>, connection: Connection) {
        let addr = connection.peer_addr();
        let (handle, mut inbound) = connection.into_parts();
        tracing::debug!(peer = %addr, phase = ?SessionPhase::HandshakingIn, "awaiting handshake");

        let deadline = self.config.transport.call_deadline_duration();
        let first = tokio::time::timeout(deadline, inbound.recv()).await;
        let (corr, payload) = match first {
            Ok(Some(Inbound::Request {
                channel: ChannelId::Handshake,
                corr,
                payload,
            })) => (corr, payload),
            _ => {
                tracing::debug!(peer = %addr, "no handshake request, dropping connection");
                handle.close();
                return;
            }
        };

        let request = match HandshakeRequest::from_bytes(&payload) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(peer = %addr, "malformed handshake request: {e}");
                handle.close();
                return;
            }
        };

        let server = handshake::process_request(&request, &self.config, &self.security);
        let error = server.response.error.clone();
        let response_bytes = match server.response.to_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(peer = %addr, "handshake response encoding failed: {e}");
                handle.close();
                return;
            }
        };

        match server.accepted {
            Some(success) => {
                // Activate before answering: the dialer may mutate its
                // registry the instant its connect() returns, and our
                // outbound pump must already be subscribed by then.
                let session_id = success.session_id.clone();
                self.activate(success, handle.clone(), inbound, addr);
                if let Err(e) = handle.respond(ChannelId::Handshake, corr, response_bytes).await {
                    tracing::warn!(peer = %addr, "handshake response send failed: {e}");
                    self.close_session(&session_id, "handshake response send failed");
                }
            }
            None => {
                let _ = handle.respond(ChannelId::Handshake, corr, response_bytes).await;
                tracing::info!(peer = %addr, "handshake refused: {error}");
                handle.close();
            }
        }
    }

    /// Insert the session and start its task group.
    fn activate(
        self: &Arc<Self>,
        success: HandshakeSuccess,
        handle: ConnectionHandle,
        inbound: mpsc::Receiver<Inbound>,
        addr: SocketAddr,
    ) -> SessionInfo {
        let session_id = success.session_id.clone();
        let cancel = CancellationToken::new();

        // Subscribe before the session is visible so no change slips
        // between activation and the pump's first recv.
        let changes = self.registry.observe_all();

        let info = SessionInfo {
            session_id: session_id.clone(),
            remote_public_key: success.remote_public_key,
            remote_schemas: success.remote_schemas,
            remote_capabilities: success.remote_capabilities,
            remote_addr: addr,
            phase: SessionPhase::Active,
            last_heartbeat_ms: now_ms(),
        };
        self.sessions.write().insert(
            session_id.clone(),
            SessionEntry {
                info: info.clone(),
                key: success.session_key.clone(),
                handle: handle.clone(),
                cancel: cancel.clone(),
            },
        );
        tracing::info!(session = %session_id, peer = %addr, "session active");

        tokio::spawn(worker::outbound_pump(
            Arc::clone(self),
            session_id.clone(),
            success.session_key.clone(),
            handle.clone(),
            changes,
            cancel.clone(),
        ));
        tokio::spawn(worker::inbound_pump(
            Arc::clone(self),
            session_id.clone(),
            success.session_key,
            handle.clone(),
            inbound,
            cancel.clone(),
        ));
        tokio::spawn(worker::heartbeat_ticker(
            Arc::clone(self),
            session_id,
            handle,
            self.config.transport.keepalive_period_duration(),
            self.config.transport.keepalive_timeout_duration(),
            cancel,
        ));

        info
    }

    /// Snapshot of `Active` sessions.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions
            .read()
            .values()
            .filter(|e| e.info.phase == SessionPhase::Active)
            .map(|e| e.info.clone())
            .collect()
    }

    /// Remove a session, closing its streams. Unknown ids are ignored.
    pub fn disconnect(&self, session_id: &str) {
        self.close_session(session_id, "disconnect requested");
    }

    /// Fan an event out to every active session in parallel. Failures
    /// are logged and non-fatal; events are best-effort.
    pub async fn broadcast_event(&self, event: &Event) {
        let targets: Vec<(String, SessionKey, ConnectionHandle)> = self
            .sessions
            .read()
            .values()
            .filter(|e| e.info.phase == SessionPhase::Active)
            .map(|e| (e.info.session_id.clone(), e.key.clone(), e.handle.clone()))
            .collect();

        for (session_id, key, handle) in targets {
            let security = Arc::clone(&self.security);
            let deadline = self.config.transport.call_deadline_duration();
            let event = event.clone();
            tokio::spawn(async move {
                if let Err(e) =
                    worker::send_event(&security, &key, &handle, &event, &session_id, deadline)
                        .await
                {
                    tracing::warn!(session = %session_id, "event send failed: {e}");
                }
            });
        }
    }

    /// Whether an address already has an active session or in-flight dial.
    pub(crate) fn known_peer(&self, addr: SocketAddr) -> bool {
        if self.dialing.lock().contains(&addr) {
            return true;
        }
        self.sessions
            .read()
            .values()
            .any(|e| e.info.remote_addr == addr)
    }

    pub(crate) fn touch_heartbeat(&self, session_id: &str) {
        if let Some(entry) = self.sessions.write().get_mut(session_id) {
            entry.info.last_heartbeat_ms = now_ms();
        }
    }

    /// Tear one session down. Idempotent: later calls for the same id
    /// are no-ops.
    pub(crate) fn close_session(&self, session_id: &str, reason: &str) {
        let Some(entry) = self.sessions.write().remove(session_id) else {
            return;
        };
        tracing::info!(session = %session_id, phase = ?SessionPhase::Closing, "closing session: {reason}");
        entry.cancel.cancel();
        entry.handle.close();
    }

    /// Tear everything down (client stop).
    pub(crate) fn close_all(&self) {
        let entries: Vec<String> = self.sessions.read().keys().cloned().collect();
        for session_id in entries {
            self.close_session(&session_id, "client stopping");
        }
    }
}

async fn resolve(host: &str, port: u16) -> Result<SocketAddr, AsinkaError> {
    let mut addrs = tokio::net::lookup_host((host, port)).await.map_err(|e| {
        AsinkaError::Transport(asinka_transport::TransportError::Connect {
            addr: SocketAddr::from(([0, 0, 0, 0], port)),
            source: e,
        })
    })?;
    addrs.next().ok_or_else(|| {
        AsinkaError::HandshakeRefused(format!("host {host} did not resolve"))
    })
}
