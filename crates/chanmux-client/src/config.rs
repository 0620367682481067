use std::time::Duration;

use serde::Deserialize;

/// Reconnect behavior after the transport is lost.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Whether to reconnect at all.
    pub enabled: bool,
    /// Attempts before giving up with a terminal `error` event.
    pub max_attempts: u32,
    /// Delay before the first attempt.
    pub base_delay_ms: u64,
    /// Growth factor applied to the delay after every failed attempt.
    pub multiplier: f64,
    /// Upper bound for any single delay.
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_delay_ms: 500,
            multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl ReconnectPolicy {
    /// A policy that never reconnects.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Whether attempt number `attempt` (1-based) may run.
    pub fn allows(&self, attempt: u32) -> bool {
        self.enabled && attempt >= 1 && attempt <= self.max_attempts
    }

    /// Delay to wait before attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(64) as i32;
        let factor = self.multiplier.max(1.0).powi(exponent);
        let delay_ms = (self.base_delay_ms as f64 * factor).min(self.max_delay_ms as f64);
        Duration::from_millis(delay_ms as u64)
    }
}

/// Client configuration.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub reconnect: ReconnectPolicy,
    /// Treat the transport as lost when nothing arrives for this long.
    /// `None` disables the check.
    pub heartbeat_timeout_ms: Option<u64>,
    /// Packets held while the transport is down before emits start failing.
    pub max_buffered_packets: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectPolicy::default(),
            heartbeat_timeout_ms: None,
            max_buffered_packets: 256,
        }
    }
}

impl ClientConfig {
    pub(crate) fn heartbeat_timeout(&self) -> Option<Duration> {
        self.heartbeat_timeout_ms.map(Duration::from_millis)
    }
}
