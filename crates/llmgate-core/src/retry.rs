//! Bounded retry policy
//!
//! A plain value describing how many vendor calls a request may make and how
//! long to wait between them. The dispatch loop in [`crate::AiManager`]
//! decides *when* to sleep; this type only decides *how long*.

use std::time::Duration;

use crate::config::FallbackConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Whether attempts may continue after the first failure
    pub enabled: bool,
    /// Total vendor calls allowed per request
    pub max_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_backoff: Duration, max_backoff: Duration) -> Self {
        Self {
            enabled: true,
            max_attempts,
            base_backoff,
            max_backoff,
        }
    }

    /// A policy that makes exactly one call
    pub fn single_attempt() -> Self {
        Self {
            enabled: false,
            max_attempts: 1,
            base_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    pub fn from_config(config: &FallbackConfig) -> Self {
        if !config.enabled {
            return Self::single_attempt();
        }
        Self::new(
            config.max_retries.max(1),
            Duration::from_millis(config.backoff_ms),
            Duration::from_millis(config.max_backoff_ms.max(config.backoff_ms)),
        )
    }

    /// True while another call is permitted after `attempts` calls
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay before the call that follows failed attempt number `attempt`
    /// (1-based): `base * 2^(attempt - 1)`, capped at `max_backoff`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        if attempt == 0 || self.base_backoff.is_zero() {
            return Duration::ZERO;
        }
        let exponent = (attempt - 1).min(31);
        let factor = 1u32 << exponent;
        self.base_backoff
            .checked_mul(factor)
            .unwrap_or(self.max_backoff)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&FallbackConfig::default())
    }
}
