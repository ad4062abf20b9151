use std::time::Duration;

use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;

use super::config::ReconnectConfig;

/// Attempt counter and delay sequence for one session's reconnect chain.
///
/// Every close or failed attempt asks for the [`next_delay`](Self::next_delay);
/// every successful open calls [`reset`](Self::reset). With the default
/// [`ReconnectConfig`] the delays are 1s, 2s, 4s, 8s, 16s and then `None`.
#[derive(Debug)]
pub struct ReconnectSchedule {
    attempts: u32,
    max_attempts: Option<u32>,
    backoff: ExponentialBackoff,
}

impl ReconnectSchedule {
    #[must_use]
    pub fn new(config: ReconnectConfig) -> Self {
        Self {
            attempts: 0,
            max_attempts: config.max_attempts,
            backoff: config.into(),
        }
    }

    /// Number of reconnect attempts scheduled since the last successful open.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Returns the delay before the next attempt and counts it, or `None` once
    /// the attempt ceiling is reached.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.max_attempts
            && self.attempts >= max
        {
            return None;
        }

        let delay = self.backoff.next_backoff()?;
        self.attempts = self.attempts.saturating_add(1);
        Some(delay)
    }

    pub fn reset(&mut self) {
        self.attempts = 0;
        self.backoff.reset();
    }
}
