/// Client facade: owns every component and the background task group.
///
/// One `AsinkaClient` is one peer. Multiple clients coexist in a
/// process; nothing here is global.
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use asinka_transport::TransportServer;

use crate::config::AsinkaConfig;
use crate::discovery::multicast::MulticastDiscovery;
use crate::discovery::{
    is_asinka_service, service_instance_name, AdvertiseState, DiscoveryEvent, DiscoveryProvider,
};
use crate::error::AsinkaError;
use crate::events::EventBus;
use crate::registry::ObjectRegistry;
use crate::security::SecurityEnvelope;
use crate::session::{SessionInfo, SessionManager};

struct RunState {
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
    bound_port: u16,
}

/// Unwind a partially started client: cancel and drain what already
/// spawned so a failed start() leaves nothing behind.
async fn abort_start(cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) {
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
}

/// The peer-to-peer sync client.
pub struct AsinkaClient {
    config: AsinkaConfig,
    instance_name: String,
    security: Arc<SecurityEnvelope>,
    registry: Arc<ObjectRegistry>,
    events: Arc<EventBus>,
    sessions: Arc<SessionManager>,
    provider: Arc<dyn DiscoveryProvider>,
    run: tokio::sync::Mutex<Option<RunState>>,
}

impl AsinkaClient {
    /// Construct all components with the bundled multicast discovery
    /// provider. Fails only on invalid configuration or if the
    /// identity keypair cannot be initialized.
    pub fn create(config: AsinkaConfig) -> Result<Self, AsinkaError> {
        Self::with_provider(config, Arc::new(MulticastDiscovery::new()))
    }

    /// Construct with a custom discovery provider (platform NSD
    /// integrations, tests).
    pub fn with_provider(
        config: AsinkaConfig,
        provider: Arc<dyn DiscoveryProvider>,
    ) -> Result<Self, AsinkaError> {
        config.validate()?;
        let security = Arc::new(SecurityEnvelope::generate()?);
        let registry = Arc::new(ObjectRegistry::new());
        let events = Arc::new(EventBus::new());
        let sessions = SessionManager::new(
            config.clone(),
            Arc::clone(&registry),
            Arc::clone(&events),
            Arc::clone(&security),
        );
        let instance_name = service_instance_name(&config.service_name);

        Ok(Self {
            config,
            instance_name,
            security,
            registry,
            events,
            sessions,
            provider,
            run: tokio::sync::Mutex::new(None),
        })
    }

    /// Start the server, advertisement, discovery and event fan-out.
    /// Idempotent: a started client stays as it is.
    pub async fn start(&self) -> Result<(), AsinkaError> {
        let mut run = self.run.lock().await;
        if run.is_some() {
            return Ok(());
        }

        let cancel = CancellationToken::new();
        let mut tasks = Vec::new();

        let mut server = TransportServer::bind(
            SocketAddr::from(([0, 0, 0, 0], self.config.server_port)),
            self.config.transport.clone(),
        )
        .await?;
        let bound_port = server.local_addr().port();

        // Accept loop: every inbound connection runs the server-side
        // handshake and, on success, becomes a session.
        {
            let sessions = Arc::clone(&self.sessions);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        connection = server.accept() => match connection {
                            Some(connection) => {
                                let sessions = Arc::clone(&sessions);
                                tokio::spawn(async move {
                                    sessions.accept(connection).await;
                                });
                            }
                            None => break,
                        }
                    }
                }
                server.shutdown().await;
            }));
        }

        // Advertisement watcher. Dropping the advertisement (task end)
        // retracts the service.
        let mut advertisement = match self.provider.advertise(&self.instance_name, bound_port).await
        {
            Ok(advertisement) => advertisement,
            Err(e) => {
                abort_start(cancel, tasks).await;
                return Err(e);
            }
        };
        {
            let token = cancel.clone();
            let name = self.instance_name.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        state = advertisement.next_state() => match state {
                            Some(AdvertiseState::Error { code, message }) => {
                                tracing::warn!(service = %name, code, "advertise error: {message}");
                            }
                            Some(state) => {
                                tracing::debug!(service = %name, ?state, "advertise state");
                            }
                            None => break,
                        }
                    }
                }
            }));
        }

        // Discovery watcher + auto-connect.
        let mut discovery = match self.provider.discover().await {
            Ok(discovery) => discovery,
            Err(e) => {
                abort_start(cancel, tasks).await;
                return Err(e);
            }
        };
        {
            let sessions = Arc::clone(&self.sessions);
            let token = cancel.clone();
            let own_name = self.instance_name.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = discovery.next_event() => match event {
                            Some(DiscoveryEvent::Found(info)) => {
                                if !is_asinka_service(&info.name) || info.name == own_name {
                                    continue;
                                }
                                tracing::debug!(service = %info.name, host = %info.host, port = info.port, "peer found");
                                let sessions = Arc::clone(&sessions);
                                tokio::spawn(async move {
                                    if let Err(e) = sessions.connect(&info.host, info.port).await {
                                        tracing::warn!(service = %info.name, "auto-connect failed: {e}");
                                    }
                                });
                            }
                            Some(DiscoveryEvent::Lost(name)) => {
                                // Heartbeats handle session teardown.
                                tracing::debug!(service = %name, "peer lost");
                            }
                            Some(DiscoveryEvent::Error { code, message }) => {
                                tracing::warn!(code, "discovery error: {message}");
                            }
                            None => break,
                        }
                    }
                }
            }));
        }

        // Event fan-out pump: locally sent events go to every session.
        // Remote events carry their origin and are not re-broadcast.
        {
            let sessions = Arc::clone(&self.sessions);
            let mut stream = self.events.observe(None);
            let token = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = token.cancelled() => break,
                        event = stream.recv() => match event {
                            Some(event) if event.origin_session.is_empty() => {
                                sessions.broadcast_event(&event).await;
                            }
                            Some(_) => {}
                            None => break,
                        }
                    }
                }
            }));
        }

        *run = Some(RunState {
            cancel,
            tasks,
            bound_port,
        });
        tracing::info!(service = %self.instance_name, port = bound_port, "asinka client started");
        Ok(())
    }

    /// Stop everything: discovery, advertisement, server, sessions,
    /// background tasks. Idempotent. After return, `sessions()` is
    /// empty and no task of this client remains scheduled.
    pub async fn stop(&self) {
        let Some(state) = self.run.lock().await.take() else {
            return;
        };

        state.cancel.cancel();
        self.sessions.close_all();

        let drain = self.config.transport.shutdown_drain_duration();
        let deadline = tokio::time::Instant::now() + drain;
        for task in state.tasks {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if tokio::time::timeout(remaining, task).await.is_err() {
                tracing::warn!("background task did not stop within {drain:?}");
            }
        }
        tracing::info!(service = %self.instance_name, "asinka client stopped");
    }

    /// Explicit dial, outside of discovery.
    pub async fn connect(&self, host: &str, port: u16) -> Result<SessionInfo, AsinkaError> {
        self.sessions.connect(host, port).await
    }

    /// Close one session. Unknown ids are ignored.
    pub fn disconnect(&self, session_id: &str) {
        self.sessions.disconnect(session_id);
    }

    /// Snapshot of active sessions.
    pub fn sessions(&self) -> Vec<SessionInfo> {
        self.sessions.sessions()
    }

    pub fn registry(&self) -> &Arc<ObjectRegistry> {
        &self.registry
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn security(&self) -> &Arc<SecurityEnvelope> {
        &self.security
    }

    /// The advertised service instance name of this client.
    pub fn instance_name(&self) -> &str {
        &self.instance_name
    }

    /// The bound server port while started; `None` when stopped.
    pub async fn local_port(&self) -> Option<u16> {
        self.run.lock().await.as_ref().map(|s| s.bound_port)
    }
}
