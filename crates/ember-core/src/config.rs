//! Engine configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

/// Timing knobs for the session machine, scheduler and advertising channel.
///
/// The defaults are deliberately generous where real hardware is slow
/// (service discovery) and tight where radio congestion hurts (the delay
/// between queued messages).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Maximum time to wait for the link to come up
    pub connect_timeout: Duration,
    /// Fallback deadline in case the platform never signals MTU completion
    pub mtu_fallback_timeout: Duration,
    /// Maximum time to wait for service discovery
    pub discovery_timeout: Duration,
    /// Delay before re-entering Connecting after a transient failure
    pub retry_delay: Duration,
    /// Transient failures tolerated before the attempt is surfaced as fatal
    pub max_retries: u8,
    /// Pause between consecutive messages drained from the outgoing queue
    pub inter_message_delay: Duration,
    /// MTU requested once the link is up
    pub target_mtu: u16,
    /// Gap between frames of a transient advertising burst
    pub burst_frame_interval: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(12),
            mtu_fallback_timeout: Duration::from_millis(800),
            discovery_timeout: Duration::from_secs(20),
            retry_delay: Duration::from_millis(500),
            max_retries: 2,
            inter_message_delay: Duration::from_millis(300),
            target_mtu: 247,
            burst_frame_interval: Duration::from_millis(120),
        }
    }
}

impl EngineConfig {
    /// Create a configuration with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the MTU fallback deadline
    pub fn with_mtu_fallback_timeout(mut self, timeout: Duration) -> Self {
        self.mtu_fallback_timeout = timeout;
        self
    }

    /// Set the service discovery timeout
    pub fn with_discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Set the retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Set the retry bound
    pub fn with_max_retries(mut self, retries: u8) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the inter-message drain delay
    pub fn with_inter_message_delay(mut self, delay: Duration) -> Self {
        self.inter_message_delay = delay;
        self
    }

    /// Set the MTU requested after connecting
    pub fn with_target_mtu(mut self, mtu: u16) -> Self {
        self.target_mtu = mtu;
        self
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
