//! Configuration constants for voice sessions, with environment overrides.

use std::env;
use std::time::Duration;

/// Voice gateway protocol version sent in the connection URL.
pub const DEFAULT_GATEWAY_VERSION: u8 = 4;

/// How long to wait for the IP discovery response.
pub const DEFAULT_DISCOVERY_TIMEOUT_MS: u64 = 2_000;

/// Period of the UDP keepalive datagram.
pub const DEFAULT_KEEPALIVE_INTERVAL_MS: u64 = 4_500;

/// Frames buffered ahead of the pacer (512 × 20ms ≈ 10s of audio).
pub const DEFAULT_FRAME_QUEUE_CAPACITY: usize = 512;

/// Per-session tunables.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub gateway_version: u8,
    pub discovery_timeout: Duration,
    pub keepalive_interval: Duration,
    pub frame_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            gateway_version: DEFAULT_GATEWAY_VERSION,
            discovery_timeout: Duration::from_millis(DEFAULT_DISCOVERY_TIMEOUT_MS),
            keepalive_interval: Duration::from_millis(DEFAULT_KEEPALIVE_INTERVAL_MS),
            frame_queue_capacity: DEFAULT_FRAME_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Builds a config from `VOICE_*` environment variables, falling back to defaults.
    #[must_use]
    pub fn from_env() -> Self {
        Self {
            gateway_version: gateway_version(),
            discovery_timeout: Duration::from_millis(env_or("VOICE_DISCOVERY_TIMEOUT_MS", DEFAULT_DISCOVERY_TIMEOUT_MS)),
            keepalive_interval: Duration::from_millis(env_or("VOICE_KEEPALIVE_INTERVAL_MS", DEFAULT_KEEPALIVE_INTERVAL_MS)),
            frame_queue_capacity: frame_queue_capacity(),
        }
    }
}

/// Returns the gateway version from `VOICE_GATEWAY_VERSION` env var or default.
#[must_use]
pub fn gateway_version() -> u8 {
    env_or("VOICE_GATEWAY_VERSION", DEFAULT_GATEWAY_VERSION)
}

/// Returns the queue capacity from `VOICE_FRAME_QUEUE_CAPACITY` env var or default.
/// Capacities below 4 are raised so the silence tail always fits.
#[must_use]
pub fn frame_queue_capacity() -> usize {
    env_or("VOICE_FRAME_QUEUE_CAPACITY", DEFAULT_FRAME_QUEUE_CAPACITY).max(4)
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
