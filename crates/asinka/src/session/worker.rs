/// Per-session tasks: outbound change pump, inbound pump, heartbeat.
///
/// Each task exits on its cancellation token or on a terminal
/// transport condition, and terminal conditions funnel through
/// `SessionManager::close_session` so the table entry goes away
/// exactly once.
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use asinka_transport::{ChannelId, ConnectionHandle, Inbound};
use asinka_wire::{
    now_ms, Event, EventMessage, EventResponse, HeartbeatRequest, HeartbeatResponse,
    ObjectDelete, ObjectUpdate, SealedPayload, SyncMessage,
};

use crate::error::AsinkaError;
use crate::registry::{ChangeStream, ObjectChange};
use crate::security::{SecurityEnvelope, SessionKey};
use crate::session::SessionManager;

/// Consecutive heartbeat failures before the session is closed.
const MAX_HEARTBEAT_MISSES: u32 = 3;

/// Forward local registry changes to the peer.
///
/// Skips changes whose origin session is this session; those came
/// from the peer in the first place and must not be echoed back.
pub(super) async fn outbound_pump(
    manager: Arc<SessionManager>,
    session_id: String,
    key: SessionKey,
    handle: ConnectionHandle,
    mut changes: ChangeStream<ObjectChange>,
    cancel: CancellationToken,
) {
    loop {
        let change = tokio::select! {
            _ = cancel.cancelled() => break,
            change = changes.recv() => match change {
                Some(change) => change,
                None => break,
            },
        };

        let message = match change {
            ObjectChange::Updated(object) => {
                if object.origin_session == session_id {
                    continue;
                }
                SyncMessage::Update(ObjectUpdate::from_object(&object, session_id.as_str()))
            }
            ObjectChange::Deleted {
                object_id,
                type_name,
                origin_session,
            } => {
                if origin_session == session_id {
                    continue;
                }
                SyncMessage::Delete(ObjectDelete::new(
                    object_id,
                    type_name,
                    session_id.as_str(),
                ))
            }
        };

        let frame = match seal_message(&manager.security, &key, &message) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(session = %session_id, "sync encode failed: {e}");
                continue;
            }
        };

        if let Err(e) = handle.send_sync(frame).await {
            manager.close_session(&session_id, &format!("sync send failed: {e}"));
            break;
        }
    }

    let dropped = changes.dropped();
    if dropped > 0 {
        tracing::warn!(session = %session_id, dropped, "outbound pump lost changes to back-pressure");
    }
}

/// Route inbound frames: sync messages into the registry through the
/// version gate, event requests into the bus, heartbeat requests back
/// out with our clock.
pub(super) async fn inbound_pump(
    manager: Arc<SessionManager>,
    session_id: String,
    key: SessionKey,
    handle: ConnectionHandle,
    mut inbound: mpsc::Receiver<Inbound>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = inbound.recv() => match item {
                Some(item) => item,
                None => {
                    manager.close_session(&session_id, "connection closed by peer");
                    break;
                }
            },
        };

        match item {
            Inbound::Sync(bytes) => {
                match open_message(&manager.security, &key, &bytes) {
                    Ok(SyncMessage::Update(update)) => {
                        manager.registry.apply_remote_update(update);
                    }
                    Ok(SyncMessage::Delete(delete)) => {
                        manager.registry.apply_remote_delete(delete);
                    }
                    Err(e) => {
                        manager.close_session(&session_id, &format!("bad sync payload: {e}"));
                        break;
                    }
                }
            }

            Inbound::Request {
                channel: ChannelId::Event,
                corr,
                payload,
            } => {
                let response = match open_event(&manager.security, &key, &payload) {
                    Ok(message) => {
                        let event_id = message.event_id.clone();
                        manager.events.deliver_remote(message, &session_id).await;
                        EventResponse {
                            success: true,
                            event_id,
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %session_id, "bad event payload: {e}");
                        EventResponse {
                            success: false,
                            event_id: String::new(),
                        }
                    }
                };
                match seal_response(&manager.security, &key, &response) {
                    Ok(frame) => {
                        if let Err(e) = handle.respond(ChannelId::Event, corr, frame).await {
                            tracing::warn!(session = %session_id, "event response send failed: {e}");
                        }
                    }
                    Err(e) => {
                        tracing::warn!(session = %session_id, "event response encode failed: {e}");
                    }
                }
            }

            Inbound::Request {
                channel: ChannelId::Heartbeat,
                corr,
                payload,
            } => {
                if let Err(e) = HeartbeatRequest::from_bytes(&payload) {
                    tracing::debug!(session = %session_id, "malformed heartbeat request: {e}");
                }
                // Always succeed with our current clock.
                let response = HeartbeatResponse {
                    success: true,
                    server_timestamp_ms: now_ms(),
                };
                let frame = match response.to_bytes() {
                    Ok(frame) => frame,
                    Err(_) => continue,
                };
                if let Err(e) = handle.respond(ChannelId::Heartbeat, corr, frame).await {
                    manager.close_session(&session_id, &format!("heartbeat response failed: {e}"));
                    break;
                }
            }

            Inbound::Request { channel, .. } => {
                tracing::debug!(session = %session_id, ?channel, "unexpected request on active session");
            }
        }
    }
}

/// Probe the peer every period; three consecutive misses close the
/// session.
pub(super) async fn heartbeat_ticker(
    manager: Arc<SessionManager>,
    session_id: String,
    handle: ConnectionHandle,
    period: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // Skip the immediate first tick; the session just handshook.
    ticker.tick().await;

    let mut misses = 0u32;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let request = HeartbeatRequest {
                    session_id: session_id.clone(),
                    timestamp_ms: now_ms(),
                };
                let Ok(payload) = request.to_bytes() else { continue };

                let alive = match handle.call(ChannelId::Heartbeat, payload, Some(timeout)).await {
                    Ok(bytes) => HeartbeatResponse::from_bytes(&bytes)
                        .map(|r| r.success)
                        .unwrap_or(false),
                    Err(_) => false,
                };

                if alive {
                    misses = 0;
                    manager.touch_heartbeat(&session_id);
                } else {
                    misses += 1;
                    tracing::debug!(session = %session_id, misses, "heartbeat missed");
                    if misses >= MAX_HEARTBEAT_MISSES {
                        manager.close_session(
                            &session_id,
                            &format!("{MAX_HEARTBEAT_MISSES} consecutive heartbeats missed"),
                        );
                        break;
                    }
                }
            }
        }
    }
}

/// One unary event send to one session.
pub(super) async fn send_event(
    security: &SecurityEnvelope,
    key: &SessionKey,
    handle: &ConnectionHandle,
    event: &Event,
    session_id: &str,
    deadline: Duration,
) -> Result<(), AsinkaError> {
    let message = EventMessage::from_event(event, session_id);
    let sealed = security.seal(&message.to_bytes()?, key)?;
    let response_bytes = handle
        .call(ChannelId::Event, sealed.to_bytes()?, Some(deadline))
        .await?;

    let sealed_response = SealedPayload::from_bytes(&response_bytes)?;
    let response = EventResponse::from_bytes(&security.open(&sealed_response, key)?)?;
    if !response.success {
        return Err(AsinkaError::Crypto(format!(
            "peer rejected event {}",
            message.event_id
        )));
    }
    Ok(())
}

fn seal_message(
    security: &SecurityEnvelope,
    key: &SessionKey,
    message: &SyncMessage,
) -> Result<Vec<u8>, AsinkaError> {
    let sealed = security.seal(&message.to_bytes()?, key)?;
    Ok(sealed.to_bytes()?)
}

fn seal_response(
    security: &SecurityEnvelope,
    key: &SessionKey,
    response: &EventResponse,
) -> Result<Vec<u8>, AsinkaError> {
    let sealed = security.seal(&response.to_bytes()?, key)?;
    Ok(sealed.to_bytes()?)
}

fn open_message(
    security: &SecurityEnvelope,
    key: &SessionKey,
    bytes: &[u8],
) -> Result<SyncMessage, AsinkaError> {
    let sealed = SealedPayload::from_bytes(bytes)?;
    let plain = security.open(&sealed, key)?;
    Ok(SyncMessage::from_bytes(&plain)?)
}

fn open_event(
    security: &SecurityEnvelope,
    key: &SessionKey,
    bytes: &[u8],
) -> Result<EventMessage, AsinkaError> {
    let sealed = SealedPayload::from_bytes(bytes)?;
    let plain = security.open(&sealed, key)?;
    Ok(EventMessage::from_bytes(&plain)?)
}
