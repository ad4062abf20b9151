#![expect(
    clippy::module_name_repetitions,
    reason = "Configuration types intentionally mirror the module name for clarity"
)]

use std::time::Duration;

use backoff::{ExponentialBackoff, ExponentialBackoffBuilder};
use bon::Builder;

const DEFAULT_HEARTBEAT_INTERVAL_DURATION: Duration = Duration::from_secs(5);
const DEFAULT_HEARTBEAT_TIMEOUT_DURATION: Duration = Duration::from_secs(15);
const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 5;
const DEFAULT_INITIAL_BACKOFF_DURATION: Duration = Duration::from_secs(1);
const DEFAULT_MAX_BACKOFF_DURATION: Duration = Duration::from_secs(16);
const DEFAULT_BACKOFF_MULTIPLIER: f64 = 2.0;

/// Configuration for WebSocket client behavior.
#[non_exhaustive]
#[derive(Debug, Clone, Default, Builder)]
pub struct Config {
    /// Reconnection strategy configuration
    #[builder(default)]
    pub reconnect: ReconnectConfig,
    /// Client-driven keep-alive. `None` (the default) sends no automatic PINGs.
    pub heartbeat: Option<HeartbeatConfig>,
    /// Upper bound on a single connection attempt. `None` lets an attempt wait
    /// for the transport indefinitely.
    pub connect_timeout: Option<Duration>,
}

/// Configuration for automatic reconnection behavior.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Maximum number of reconnection attempts before giving up.
    /// `None` means infinite retries.
    pub max_attempts: Option<u32>,
    /// Backoff duration before the first reconnection attempt
    pub initial_backoff: Duration,
    /// Maximum backoff duration
    pub max_backoff: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Random spread applied to each delay, `0.0` keeps the schedule exact
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: Some(DEFAULT_MAX_RECONNECT_ATTEMPTS),
            initial_backoff: DEFAULT_INITIAL_BACKOFF_DURATION,
            max_backoff: DEFAULT_MAX_BACKOFF_DURATION,
            backoff_multiplier: DEFAULT_BACKOFF_MULTIPLIER,
            jitter: 0.0,
        }
    }
}

impl ReconnectConfig {
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: Option<u32>) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    #[must_use]
    pub fn with_initial_backoff(mut self, initial_backoff: Duration) -> Self {
        self.initial_backoff = initial_backoff;
        self
    }

    #[must_use]
    pub fn with_max_backoff(mut self, max_backoff: Duration) -> Self {
        self.max_backoff = max_backoff;
        self
    }

    #[must_use]
    pub fn with_backoff_multiplier(mut self, backoff_multiplier: f64) -> Self {
        self.backoff_multiplier = backoff_multiplier;
        self
    }

    #[must_use]
    pub fn with_jitter(mut self, jitter: f64) -> Self {
        self.jitter = jitter;
        self
    }
}

impl From<ReconnectConfig> for ExponentialBackoff {
    fn from(config: ReconnectConfig) -> Self {
        ExponentialBackoffBuilder::default()
            .with_initial_interval(config.initial_backoff)
            .with_max_interval(config.max_backoff)
            .with_multiplier(config.backoff_multiplier)
            .with_randomization_factor(config.jitter)
            .with_max_elapsed_time(None) // We handle max attempts separately
            .build()
    }
}

/// Configuration for the optional PING/PONG keep-alive.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Builder)]
pub struct HeartbeatConfig {
    /// Interval for sending PING messages to keep connection alive
    #[builder(default = DEFAULT_HEARTBEAT_INTERVAL_DURATION)]
    pub interval: Duration,
    /// Maximum time to wait for PONG response before considering connection dead
    #[builder(default = DEFAULT_HEARTBEAT_TIMEOUT_DURATION)]
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL_DURATION,
            timeout: DEFAULT_HEARTBEAT_TIMEOUT_DURATION,
        }
    }
}
