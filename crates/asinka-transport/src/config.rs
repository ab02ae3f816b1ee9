use std::time::Duration;

/// Transport tuning knobs.
///
/// All fields have the protocol defaults. Builder pattern:
///
/// ```rust
/// use asinka_transport::TransportConfig;
///
/// let config = TransportConfig::new()
///     .max_message_size(8 * 1024 * 1024)
///     .keepalive_period(std::time::Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// Maximum frame payload size in bytes.
    pub(crate) max_message_size: usize,
    /// Heartbeat send period.
    pub(crate) keepalive_period: Duration,
    /// Deadline for a single heartbeat round trip.
    pub(crate) keepalive_timeout: Duration,
    /// Close a connection after this long with no frame activity.
    pub(crate) idle_timeout: Duration,
    /// Budget for graceful drain on shutdown.
    pub(crate) shutdown_drain: Duration,
    /// Default deadline for unary calls.
    pub(crate) call_deadline: Duration,
    /// Channel buffer for inbound frames per connection.
    pub(crate) recv_buffer: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportConfig {
    pub fn new() -> Self {
        Self {
            max_message_size: 4 * 1024 * 1024,
            keepalive_period: Duration::from_secs(30),
            keepalive_timeout: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(5 * 60),
            shutdown_drain: Duration::from_secs(5),
            call_deadline: Duration::from_secs(5),
            recv_buffer: 256,
        }
    }

    /// Set the maximum frame payload size (default: 4 MiB).
    pub fn max_message_size(mut self, bytes: usize) -> Self {
        self.max_message_size = bytes;
        self
    }

    /// Set the heartbeat period (default: 30 s).
    pub fn keepalive_period(mut self, period: Duration) -> Self {
        self.keepalive_period = period;
        self
    }

    /// Set the heartbeat round-trip deadline (default: 10 s).
    pub fn keepalive_timeout(mut self, timeout: Duration) -> Self {
        self.keepalive_timeout = timeout;
        self
    }

    /// Set the idle-connection shutdown threshold (default: 5 min).
    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Set the graceful-shutdown drain budget (default: 5 s).
    pub fn shutdown_drain(mut self, budget: Duration) -> Self {
        self.shutdown_drain = budget;
        self
    }

    /// Set the default unary call deadline (default: 5 s).
    pub fn call_deadline(mut self, deadline: Duration) -> Self {
        self.call_deadline = deadline;
        self
    }

    /// Set the inbound frame buffer per connection (default: 256).
    pub fn recv_buffer(mut self, capacity: usize) -> Self {
        self.recv_buffer = capacity;
        self
    }

    pub fn max_message_size_bytes(&self) -> usize {
        self.max_message_size
    }

    pub fn keepalive_period_duration(&self) -> Duration {
        self.keepalive_period
    }

    pub fn keepalive_timeout_duration(&self) -> Duration {
        self.keepalive_timeout
    }

    pub fn call_deadline_duration(&self) -> Duration {
        self.call_deadline
    }

    pub fn shutdown_drain_duration(&self) -> Duration {
        self.shutdown_drain
    }
}
