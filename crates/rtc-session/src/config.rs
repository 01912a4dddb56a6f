//! Session configuration.

use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Configuration shared by the RPC session client and the signaling client.
#[derive(Clone, Debug)]
pub struct SessionConfig {
    // Requests
    /// Default timeout for correlated calls.
    pub rpc_timeout: Duration,
    /// Extra time a replayed call may wait beyond `rpc_timeout`.
    pub replay_grace: Duration,
    /// Maximum number of pending requests.
    pub max_pending_requests: usize,

    // Connection
    /// Timeout for the socket handshake.
    pub handshake_timeout: Duration,
    /// Close codes that end the session instead of triggering a reconnect.
    pub fatal_close_codes: Vec<u16>,
    /// Maximum inbound message size in bytes.
    pub max_message_size: usize,
    /// Capacity of the per-connection command channel.
    pub command_channel_capacity: usize,

    // Reconnection
    /// Maximum number of reconnect attempts before the client goes fatal.
    pub max_retries: u32,
    /// Base interval of the quadratic backoff.
    pub backoff_base_interval: Duration,
    /// Maximum random jitter, scaled by the square of the retry count.
    pub backoff_jitter: Duration,

    // Event ordering
    /// How long a gap may stay open before a resync is requested.
    pub gap_lifetime: Duration,

    // Signaling
    /// Interval between connectivity checks.
    pub heartbeat_interval: Duration,
    /// Maximum wait for a heartbeat acknowledgement.
    pub heartbeat_ack_timeout: Duration,
    /// Maximum wait for the acknowledgement of any other signaling message.
    pub ack_timeout: Duration,
    /// Maximum serialized size of an outbound signaling message.
    pub max_payload_size: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            rpc_timeout: Duration::from_secs(10),
            replay_grace: Duration::from_millis(100),
            max_pending_requests: 1000,
            handshake_timeout: Duration::from_secs(5),
            fatal_close_codes: vec![1008],
            max_message_size: 16 * 1024 * 1024, // 16 MB
            command_channel_capacity: 64,
            max_retries: 10,
            backoff_base_interval: Duration::from_millis(500),
            backoff_jitter: Duration::from_millis(250),
            gap_lifetime: Duration::from_millis(1000),
            heartbeat_interval: Duration::from_secs(30),
            heartbeat_ack_timeout: Duration::from_secs(5),
            ack_timeout: Duration::from_secs(5),
            max_payload_size: 20 * 1024,
        }
    }
}

impl SessionConfig {
    /// Create a configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the default call timeout.
    #[must_use]
    pub fn rpc_timeout(mut self, timeout: Duration) -> Self {
        self.rpc_timeout = timeout;
        self
    }

    /// Set the replay grace period.
    #[must_use]
    pub fn replay_grace(mut self, grace: Duration) -> Self {
        self.replay_grace = grace;
        self
    }

    /// Set the maximum pending requests.
    #[must_use]
    pub fn max_pending_requests(mut self, max: usize) -> Self {
        self.max_pending_requests = max;
        self
    }

    /// Set the handshake timeout.
    #[must_use]
    pub fn handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = timeout;
        self
    }

    /// Set the close codes treated as non-recoverable.
    #[must_use]
    pub fn fatal_close_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.fatal_close_codes = codes.into();
        self
    }

    /// Set the maximum inbound message size.
    #[must_use]
    pub fn max_message_size(mut self, size: usize) -> Self {
        self.max_message_size = size;
        self
    }

    /// Set the reconnect retry budget.
    #[must_use]
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the backoff base interval.
    #[must_use]
    pub fn backoff_base_interval(mut self, interval: Duration) -> Self {
        self.backoff_base_interval = interval;
        self
    }

    /// Set the backoff jitter.
    #[must_use]
    pub fn backoff_jitter(mut self, jitter: Duration) -> Self {
        self.backoff_jitter = jitter;
        self
    }

    /// Set the gap lifetime of event ordering buffers.
    #[must_use]
    pub fn gap_lifetime(mut self, lifetime: Duration) -> Self {
        self.gap_lifetime = lifetime;
        self
    }

    /// Set the heartbeat interval.
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the heartbeat acknowledgement timeout.
    #[must_use]
    pub fn heartbeat_ack_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_ack_timeout = timeout;
        self
    }

    /// Set the acknowledgement timeout for signaling messages.
    #[must_use]
    pub fn ack_timeout(mut self, timeout: Duration) -> Self {
        self.ack_timeout = timeout;
        self
    }

    /// Set the maximum outbound signaling payload size.
    #[must_use]
    pub fn max_payload_size(mut self, size: usize) -> Self {
        self.max_payload_size = size;
        self
    }

    pub(crate) fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            max_retries: self.max_retries,
            base_interval: self.backoff_base_interval,
            jitter: self.backoff_jitter,
        }
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.rpc_timeout.is_zero() {
            return Err("RPC timeout must be > 0".to_string());
        }
        if self.handshake_timeout.is_zero() {
            return Err("Handshake timeout must be > 0".to_string());
        }
        self.backoff().validate()?;
        if self.gap_lifetime.is_zero() {
            return Err("Gap lifetime must be > 0".to_string());
        }
        if self.heartbeat_interval.is_zero() {
            return Err("Heartbeat interval must be > 0".to_string());
        }
        if self.heartbeat_ack_timeout.is_zero() {
            return Err("Heartbeat ack timeout must be > 0".to_string());
        }
        if self.ack_timeout.is_zero() {
            return Err("Ack timeout must be > 0".to_string());
        }
        if self.max_payload_size == 0 {
            return Err("Max payload size must be > 0".to_string());
        }
        if self.max_pending_requests == 0 {
            return Err("Max pending requests must be > 0".to_string());
        }
        if self.command_channel_capacity == 0 {
            return Err("Command channel capacity must be > 0".to_string());
        }
        Ok(())
    }
}
