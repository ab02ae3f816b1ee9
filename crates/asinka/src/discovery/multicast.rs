/// Bundled discovery provider: UDP multicast beacons.
///
/// Satisfies the discovery port on hosts without a native DNS-SD
/// daemon. Advertisers send a periodic announce packet to the group
/// and a goodbye on retract; the browser tracks last-seen times and
/// declares a service lost after three missed announce intervals.
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use asinka_wire::now_ms;

use crate::discovery::{
    Advertisement, AdvertiseState, DiscoveryEvent, DiscoveryProvider, DiscoveryStream,
    ServiceInfo, SERVICE_TYPE,
};
use crate::error::AsinkaError;

/// Multicast group shared by all asinka peers.
pub const DEFAULT_GROUP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 251);
/// Default beacon port.
pub const DEFAULT_PORT: u16 = 5353;
/// Announce period.
const ANNOUNCE_INTERVAL: Duration = Duration::from_secs(2);
/// Announce intervals missed before a peer is declared lost.
const LOST_AFTER_INTERVALS: u32 = 3;

#[derive(Debug, Clone, Serialize, Deserialize)]
enum Packet {
    Announce(Beacon),
    Goodbye { name: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Beacon {
    name: String,
    type_tag: String,
    port: u16,
    attrs: HashMap<String, String>,
    timestamp_ms: u64,
}

/// UDP multicast beacon provider.
pub struct MulticastDiscovery {
    group: Ipv4Addr,
    port: u16,
    announce_interval: Duration,
}

impl Default for MulticastDiscovery {
    fn default() -> Self {
        Self::new()
    }
}

impl MulticastDiscovery {
    pub fn new() -> Self {
        Self {
            group: DEFAULT_GROUP,
            port: DEFAULT_PORT,
            announce_interval: ANNOUNCE_INTERVAL,
        }
    }

    /// Use a non-default group/port (tests run several providers side
    /// by side on distinct ports).
    pub fn with_endpoint(group: Ipv4Addr, port: u16) -> Self {
        Self {
            group,
            port,
            announce_interval: ANNOUNCE_INTERVAL,
        }
    }

    /// Override the announce period.
    pub fn announce_interval(mut self, interval: Duration) -> Self {
        self.announce_interval = interval;
        self
    }

    fn discovery_error(message: impl Into<String>, source: &std::io::Error) -> AsinkaError {
        AsinkaError::Discovery {
            code: source.raw_os_error().unwrap_or(-1),
            message: format!("{}: {source}", message.into()),
        }
    }
}

#[async_trait]
impl DiscoveryProvider for MulticastDiscovery {
    async fn advertise(
        &self,
        service_name: &str,
        port: u16,
    ) -> Result<Advertisement, AsinkaError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))
            .await
            .map_err(|e| Self::discovery_error("advertise socket bind failed", &e))?;
        socket
            .set_multicast_loop_v4(true)
            .map_err(|e| Self::discovery_error("multicast loop setup failed", &e))?;

        let (states_tx, states_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();
        let beacon = Beacon {
            name: service_name.to_string(),
            type_tag: SERVICE_TYPE.to_string(),
            port,
            attrs: HashMap::new(),
            timestamp_ms: now_ms(),
        };

        tokio::spawn(advertise_loop(
            socket,
            SocketAddr::from((self.group, self.port)),
            beacon,
            self.announce_interval,
            states_tx,
            cancel.clone(),
        ));

        Ok(Advertisement::new(states_rx, cancel))
    }

    async fn discover(&self) -> Result<DiscoveryStream, AsinkaError> {
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, self.port))
            .await
            .map_err(|e| Self::discovery_error("discover socket bind failed", &e))?;
        socket
            .join_multicast_v4(self.group, Ipv4Addr::UNSPECIFIED)
            .map_err(|e| Self::discovery_error("multicast join failed", &e))?;

        let (events_tx, events_rx) = mpsc::channel(64);
        let cancel = CancellationToken::new();

        tokio::spawn(discover_loop(
            socket,
            self.announce_interval,
            events_tx,
            cancel.clone(),
        ));

        Ok(DiscoveryStream::new(events_rx, cancel))
    }
}

async fn advertise_loop(
    socket: UdpSocket,
    dest: SocketAddr,
    mut beacon: Beacon,
    interval: Duration,
    states_tx: mpsc::Sender<AdvertiseState>,
    cancel: CancellationToken,
) {
    let _ = states_tx.try_send(AdvertiseState::Idle);

    let mut ticker = tokio::time::interval(interval);
    let mut advertising = false;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                beacon.timestamp_ms = now_ms();
                let Ok(bytes) = rmp_serde::to_vec(&Packet::Announce(beacon.clone())) else {
                    continue;
                };
                match socket.send_to(&bytes, dest).await {
                    Ok(_) if !advertising => {
                        advertising = true;
                        let _ = states_tx.try_send(AdvertiseState::Advertising);
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!("beacon send failed: {e}");
                        advertising = false;
                        let _ = states_tx.try_send(AdvertiseState::Error {
                            code: e.raw_os_error().unwrap_or(-1),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    // Retract: best-effort goodbye so browsers drop us promptly.
    if let Ok(bytes) = rmp_serde::to_vec(&Packet::Goodbye {
        name: beacon.name.clone(),
    }) {
        let _ = socket.send_to(&bytes, dest).await;
    }
    tracing::debug!(service = %beacon.name, "advertisement retracted");
}

async fn discover_loop(
    socket: UdpSocket,
    interval: Duration,
    events_tx: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let lost_after = interval * LOST_AFTER_INTERVALS;
    let mut last_seen: HashMap<String, Instant> = HashMap::new();
    let mut sweep = tokio::time::interval(interval);
    let mut buf = vec![0u8; 4096];

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,

            _ = sweep.tick() => {
                let now = Instant::now();
                let expired: Vec<String> = last_seen
                    .iter()
                    .filter(|(_, seen)| now.duration_since(**seen) >= lost_after)
                    .map(|(name, _)| name.clone())
                    .collect();
                for name in expired {
                    last_seen.remove(&name);
                    if events_tx.send(DiscoveryEvent::Lost(name)).await.is_err() {
                        return;
                    }
                }
            }

            result = socket.recv_from(&mut buf) => match result {
                Ok((len, from)) => match rmp_serde::from_slice::<Packet>(&buf[..len]) {
                    Ok(Packet::Announce(beacon)) => {
                        let first_sighting = last_seen
                            .insert(beacon.name.clone(), Instant::now())
                            .is_none();
                        if first_sighting {
                            let info = ServiceInfo {
                                name: beacon.name,
                                type_tag: beacon.type_tag,
                                host: from.ip().to_string(),
                                port: beacon.port,
                                attrs: beacon.attrs,
                            };
                            if events_tx.send(DiscoveryEvent::Found(info)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Ok(Packet::Goodbye { name }) => {
                        if last_seen.remove(&name).is_some()
                            && events_tx.send(DiscoveryEvent::Lost(name)).await.is_err()
                        {
                            return;
                        }
                    }
                    // Foreign traffic on the group; not ours to report.
                    Err(_) => {}
                },
                Err(e) => {
                    tracing::warn!("discovery recv failed: {e}");
                    let event = DiscoveryEvent::Error {
                        code: e.raw_os_error().unwrap_or(-1),
                        message: e.to_string(),
                    };
                    if events_tx.send(event).await.is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn provider(port: u16) -> MulticastDiscovery {
        MulticastDiscovery::with_endpoint(DEFAULT_GROUP, port)
            .announce_interval(Duration::from_millis(100))
    }

    /// Whether this host can send to and join the multicast group at
    /// all (restricted sandboxes may have no multicast route).
    async fn multicast_available() -> bool {
        let Ok(socket) = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await else {
            return false;
        };
        if socket.set_multicast_loop_v4(true).is_err() {
            return false;
        }
        if socket
            .join_multicast_v4(DEFAULT_GROUP, Ipv4Addr::UNSPECIFIED)
            .is_err()
        {
            return false;
        }
        socket.send_to(b"probe", (DEFAULT_GROUP, 59999)).await.is_ok()
    }

    #[test]
    fn packet_roundtrip() {
        let packet = Packet::Announce(Beacon {
            name: "asinka-app-0a1b2c3d".into(),
            type_tag: SERVICE_TYPE.into(),
            port: 8888,
            attrs: HashMap::new(),
            timestamp_ms: 1_708_000_000_000,
        });
        let bytes = rmp_serde::to_vec(&packet).expect("serialize");
        let decoded: Packet = rmp_serde::from_slice(&bytes).expect("deserialize");
        match decoded {
            Packet::Announce(beacon) => {
                assert_eq!(beacon.name, "asinka-app-0a1b2c3d");
                assert_eq!(beacon.port, 8888);
            }
            Packet::Goodbye { .. } => panic!("wrong variant"),
        }
    }

    #[tokio::test]
    async fn advertise_reports_advertising() {
        if !multicast_available().await {
            eprintln!("multicast unavailable on this host, skipping");
            return;
        }
        let provider = provider(53531);
        let mut ad = provider
            .advertise("asinka-test-00000001", 9000)
            .await
            .expect("advertise");

        let mut states = Vec::new();
        for _ in 0..2 {
            match tokio::time::timeout(Duration::from_secs(5), ad.next_state()).await {
                Ok(Some(state)) => states.push(state),
                _ => break,
            }
        }
        assert!(states.contains(&AdvertiseState::Advertising), "states: {states:?}");
    }

    #[tokio::test]
    async fn browser_sees_found_then_lost_on_retract() {
        if !multicast_available().await {
            eprintln!("multicast unavailable on this host, skipping");
            return;
        }
        let provider = provider(53532);
        let mut stream = provider.discover().await.expect("discover");
        let ad = provider
            .advertise("asinka-test-0000000a", 9001)
            .await
            .expect("advertise");

        let found = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match stream.next_event().await {
                    Some(DiscoveryEvent::Found(info)) if info.name == "asinka-test-0000000a" => {
                        return info;
                    }
                    Some(_) => continue,
                    None => panic!("stream ended"),
                }
            }
        })
        .await
        .expect("no Found event");
        assert_eq!(found.port, 9001);
        assert_eq!(found.type_tag, SERVICE_TYPE);

        // Dropping the advertisement sends the goodbye.
        drop(ad);

        tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match stream.next_event().await {
                    Some(DiscoveryEvent::Lost(name)) if name == "asinka-test-0000000a" => return,
                    Some(_) => continue,
                    None => panic!("stream ended"),
                }
            }
        })
        .await
        .expect("no Lost event");
    }

    #[tokio::test]
    async fn silent_peer_goes_lost_after_sweep() {
        if !multicast_available().await {
            eprintln!("multicast unavailable on this host, skipping");
            return;
        }
        let provider = provider(53533);
        let mut stream = provider.discover().await.expect("discover");

        // One hand-rolled announce, then silence.
        let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await.unwrap();
        socket.set_multicast_loop_v4(true).unwrap();
        let packet = Packet::Announce(Beacon {
            name: "asinka-oneshot-00000001".into(),
            type_tag: SERVICE_TYPE.into(),
            port: 9002,
            attrs: HashMap::new(),
            timestamp_ms: now_ms(),
        });
        socket
            .send_to(
                &rmp_serde::to_vec(&packet).unwrap(),
                (DEFAULT_GROUP, 53533),
            )
            .await
            .unwrap();

        let mut saw_found = false;
        let mut saw_lost = false;
        let deadline = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(event) = stream.next_event().await {
                match event {
                    DiscoveryEvent::Found(info) if info.name == "asinka-oneshot-00000001" => {
                        saw_found = true;
                    }
                    DiscoveryEvent::Lost(name) if name == "asinka-oneshot-00000001" => {
                        saw_lost = true;
                        break;
                    }
                    _ => {}
                }
            }
        })
        .await;
        assert!(deadline.is_ok(), "sweep never declared the peer lost");
        assert!(saw_found);
        assert!(saw_lost);
    }
}
