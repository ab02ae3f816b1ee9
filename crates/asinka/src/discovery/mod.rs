/// Discovery port: how the core learns about peers on the LAN.
///
/// The provider is an external collaborator behind [`DiscoveryProvider`];
/// the core only consumes the two stream contracts. A bundled UDP
/// multicast provider lives in [`multicast`] for platforms without a
/// native service-discovery daemon.
pub mod multicast;

use std::collections::HashMap;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::mpsc;
use tokio_util::sync::{CancellationToken, DropGuard};

use crate::error::AsinkaError;

/// Service type tag all asinka peers advertise under.
pub const SERVICE_TYPE: &str = "_asinka._tcp.";

/// Prefix of every asinka service instance name.
pub const SERVICE_PREFIX: &str = "asinka-";

/// Build a service instance name: `asinka-<human name>-<8 random hex>`.
///
/// The random suffix keeps instances of the same app distinguishable;
/// the full name suppresses loopback discovery of self.
pub fn service_instance_name(human_name: &str) -> String {
    let suffix: u32 = rand::thread_rng().gen();
    format!("{SERVICE_PREFIX}{human_name}-{suffix:08x}")
}

/// Whether a discovered service name follows the asinka convention.
pub fn is_asinka_service(name: &str) -> bool {
    name.starts_with(SERVICE_PREFIX)
}

/// A service seen on the network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceInfo {
    pub name: String,
    pub type_tag: String,
    pub host: String,
    pub port: u16,
    pub attrs: HashMap<String, String>,
}

/// State changes of our own advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdvertiseState {
    Idle,
    Advertising,
    Error { code: i32, message: String },
}

/// Appearance and disappearance of peers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    Found(ServiceInfo),
    Lost(String),
    Error { code: i32, message: String },
}

/// A live advertisement. Dropping it retracts the service.
pub struct Advertisement {
    states: mpsc::Receiver<AdvertiseState>,
    _guard: DropGuard,
}

impl Advertisement {
    pub fn new(states: mpsc::Receiver<AdvertiseState>, cancel: CancellationToken) -> Self {
        Self {
            states,
            _guard: cancel.drop_guard(),
        }
    }

    /// Next state change; `None` once the provider stops reporting.
    pub async fn next_state(&mut self) -> Option<AdvertiseState> {
        self.states.recv().await
    }
}

/// A live browse operation. Dropping it stops browsing.
pub struct DiscoveryStream {
    events: mpsc::Receiver<DiscoveryEvent>,
    _guard: DropGuard,
}

impl DiscoveryStream {
    pub fn new(events: mpsc::Receiver<DiscoveryEvent>, cancel: CancellationToken) -> Self {
        Self {
            events,
            _guard: cancel.drop_guard(),
        }
    }

    /// Next discovery event; `None` once the provider stops.
    pub async fn next_event(&mut self) -> Option<DiscoveryEvent> {
        self.events.recv().await
    }
}

/// The two capabilities the core consumes from a discovery provider.
#[async_trait]
pub trait DiscoveryProvider: Send + Sync {
    /// Advertise a service instance on the given port.
    async fn advertise(
        &self,
        service_name: &str,
        port: u16,
    ) -> Result<Advertisement, AsinkaError>;

    /// Start browsing for services.
    async fn discover(&self) -> Result<DiscoveryStream, AsinkaError>;
}
