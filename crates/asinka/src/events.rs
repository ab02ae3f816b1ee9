/// Event bus: in-process typed dispatch with filtering.
///
/// One broadcast stream feeds every subscriber; registered receivers
/// additionally get awaited, one at a time, when a remote event is
/// delivered. Receivers must complete quickly; dispatch is sequential
/// and a slow receiver delays the ones after it.
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::broadcast;

use asinka_wire::{Event, EventMessage};

use crate::registry::ChangeStream;

/// Buffer per event subscriber; overflow drops oldest undispatched.
const EVENT_BUFFER: usize = 256;

/// A registered callback with an event-type filter.
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// Event types this receiver wants. Empty matches all.
    fn event_types(&self) -> Vec<String>;

    /// Handle one matching event.
    async fn on_event(&self, event: &Event);
}

/// Hot, optionally filtered subscription to the event stream.
pub struct EventStream {
    inner: ChangeStream<Event>,
    filter: Option<String>,
}

impl EventStream {
    /// Next matching event; `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Event> {
        loop {
            let event = self.inner.recv().await?;
            match &self.filter {
                Some(wanted) if &event.event_type != wanted => continue,
                _ => return Some(event),
            }
        }
    }

    /// Non-blocking variant; `None` when empty or closed.
    pub fn try_recv(&mut self) -> Option<Event> {
        loop {
            let event = self.inner.try_recv()?;
            match &self.filter {
                Some(wanted) if &event.event_type != wanted => continue,
                _ => return Some(event),
            }
        }
    }

    /// Events lost to back-pressure (before filtering).
    pub fn dropped(&self) -> u64 {
        self.inner.dropped()
    }
}

/// Multi-producer, multi-consumer event dispatch point.
pub struct EventBus {
    tx: broadcast::Sender<Event>,
    receivers: RwLock<HashMap<String, Arc<dyn EventReceiver>>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            tx,
            receivers: RwLock::new(HashMap::new()),
        }
    }

    /// Enqueue an event for every current subscriber. Never blocks.
    pub fn send(&self, event: Event) {
        let _ = self.tx.send(event);
    }

    /// Subscribe; with a type the stream emits only matching events.
    pub fn observe(&self, event_type: Option<&str>) -> EventStream {
        EventStream {
            inner: ChangeStream::new(self.tx.subscribe()),
            filter: event_type.map(String::from),
        }
    }

    /// Register a receiver under a name. Re-registering the same name
    /// replaces the previous receiver (idempotent).
    pub fn register_receiver(&self, name: impl Into<String>, receiver: Arc<dyn EventReceiver>) {
        self.receivers.write().insert(name.into(), receiver);
    }

    /// Unregister by name. Unknown names are ignored (idempotent).
    pub fn unregister_receiver(&self, name: &str) {
        self.receivers.write().remove(name);
    }

    /// Deliver an event that arrived from a peer: stamp its origin,
    /// broadcast it, then invoke each matching registered receiver
    /// sequentially, awaiting each.
    pub async fn deliver_remote(&self, message: EventMessage, origin_session: &str) {
        let event = message.into_event(origin_session);
        let _ = self.tx.send(event.clone());

        let matching: Vec<Arc<dyn EventReceiver>> = {
            let receivers = self.receivers.read();
            receivers
                .values()
                .filter(|r| {
                    let types = r.event_types();
                    types.is_empty() || types.iter().any(|t| t == &event.event_type)
                })
                .cloned()
                .collect()
        };

        for receiver in matching {
            receiver.on_event(&event).await;
        }
    }
}
