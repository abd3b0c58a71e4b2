//! Per-endpoint circuit breaker
//!
//! Closed → Open once consecutive failures reach the threshold. After the
//! reset timeout one caller is admitted as a HalfOpen trial; its outcome
//! closes the circuit again or re-opens it with a fresh `opened_at`.

use std::sync::{Mutex, MutexGuard};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Requests flow normally
    #[default]
    Closed,
    /// Endpoint excluded until the reset timeout elapses
    Open,
    /// One trial request is in flight
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half_open"),
        }
    }
}

/// How a request was let through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Normal,
    Trial,
}

#[derive(Debug, Default)]
struct BreakerState {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trial_in_flight: bool,
}

/// Failure state machine for a single endpoint
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            inner: Mutex::new(BreakerState::default()),
        }
    }

    // A panic while holding the guard cannot leave the counters half-written,
    // so a poisoned lock is still safe to read.
    fn lock(&self) -> MutexGuard<'_, BreakerState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn reset_elapsed(&self, inner: &BreakerState, now: Instant) -> bool {
        match inner.opened_at {
            Some(opened) => now.saturating_duration_since(opened) >= self.config.reset_timeout(),
            None => true,
        }
    }

    /// Whether `try_acquire` would currently admit a request. Does not
    /// consume the HalfOpen trial.
    pub fn is_available(&self, now: Instant) -> bool {
        if !self.config.enabled {
            return true;
        }
        let inner = self.lock();
        match inner.state {
            CircuitState::Closed => true,
            CircuitState::Open => self.reset_elapsed(&inner, now),
            CircuitState::HalfOpen => false,
        }
    }

    /// Admit a request, promoting an expired Open circuit to HalfOpen for
    /// exactly one trial.
    pub fn try_acquire(&self, now: Instant) -> Option<Admission> {
        if !self.config.enabled {
            return Some(Admission::Normal);
        }
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => Some(Admission::Normal),
            CircuitState::Open if self.reset_elapsed(&inner, now) => {
                inner.state = CircuitState::HalfOpen;
                inner.trial_in_flight = true;
                info!(endpoint = %self.name, "Circuit half-open, admitting trial request");
                Some(Admission::Trial)
            }
            CircuitState::Open | CircuitState::HalfOpen => None,
        }
    }

    pub fn record_success(&self) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();
        if inner.state != CircuitState::Closed {
            info!(endpoint = %self.name, "Circuit closed after successful call");
        }
        *inner = BreakerState::default();
    }

    pub fn record_failure(&self, now: Instant) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.lock();
        inner.consecutive_failures = inner.consecutive_failures.saturating_add(1);
        match inner.state {
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.trial_in_flight = false;
                warn!(endpoint = %self.name, "Trial request failed, circuit re-opened");
            }
            CircuitState::Closed if inner.consecutive_failures >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!(
                    endpoint = %self.name,
                    failures = inner.consecutive_failures,
                    "Circuit opened"
                );
            }
            // A late failure from a call admitted before the circuit opened
            // must not push the reset window out.
            _ => debug!(
                endpoint = %self.name,
                failures = inner.consecutive_failures,
                "Recorded endpoint failure"
            ),
        }
    }

    /// Give back a trial that ended without an outcome (throttled or
    /// cancelled). The circuit returns to Open with its original timestamp,
    /// so the next caller may trial immediately.
    pub fn abandon_trial(&self) {
        let mut inner = self.lock();
        if inner.state == CircuitState::HalfOpen && inner.trial_in_flight {
            inner.state = CircuitState::Open;
            inner.trial_in_flight = false;
            debug!(endpoint = %self.name, "Trial abandoned, circuit back to open");
        }
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.lock().consecutive_failures
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn breaker(threshold: u32, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(
            "test/0",
            CircuitBreakerConfig {
                enabled: true,
                failure_threshold: threshold,
                reset_timeout_ms: reset_ms,
            },
        )
    }

    #[test]
    fn test_opens_after_threshold() {
        let cb = breaker(5, 1000);
        let now = Instant::now();
        for _ in 0..4 {
            cb.record_failure(now);
            assert_eq!(cb.state(), CircuitState::Closed);
        }
        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.consecutive_failures(), 5);
        assert!(cb.try_acquire(now).is_none());
        assert!(!cb.is_available(now));
    }

    #[test]
    fn test_success_resets_counter() {
        let cb = breaker(3, 1000);
        let now = Instant::now();
        cb.record_failure(now);
        cb.record_failure(now);
        cb.record_success();
        cb.record_failure(now);
        cb.record_failure(now);
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 2);
    }

    #[test]
    fn test_single_trial_after_reset_timeout() {
        let cb = breaker(1, 100);
        let opened = Instant::now();
        cb.record_failure(opened);

        let before = opened + Duration::from_millis(99);
        assert!(cb.try_acquire(before).is_none());

        let after = opened + Duration::from_millis(100);
        assert!(cb.is_available(after));
        assert_eq!(cb.try_acquire(after), Some(Admission::Trial));
        assert_eq!(cb.state(), CircuitState::HalfOpen);

        // second caller in the same window is rejected
        assert!(cb.try_acquire(after).is_none());
        assert!(!cb.is_available(after));
    }

    #[test]
    fn test_trial_success_closes() {
        let cb = breaker(1, 100);
        let opened = Instant::now();
        cb.record_failure(opened);
        let after = opened + Duration::from_millis(150);
        assert_eq!(cb.try_acquire(after), Some(Admission::Trial));
        cb.record_success();
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
        assert_eq!(cb.try_acquire(after), Some(Admission::Normal));
    }

    #[test]
    fn test_trial_failure_reopens_with_fresh_window() {
        let cb = breaker(1, 100);
        let opened = Instant::now();
        cb.record_failure(opened);
        let trial_at = opened + Duration::from_millis(100);
        cb.try_acquire(trial_at).unwrap();
        cb.record_failure(trial_at);
        assert_eq!(cb.state(), CircuitState::Open);

        assert!(cb.try_acquire(trial_at + Duration::from_millis(50)).is_none());
        assert_eq!(
            cb.try_acquire(trial_at + Duration::from_millis(100)),
            Some(Admission::Trial)
        );
    }

    #[test]
    fn test_abandoned_trial_can_be_retaken() {
        let cb = breaker(1, 100);
        let opened = Instant::now();
        cb.record_failure(opened);
        let after = opened + Duration::from_millis(100);
        cb.try_acquire(after).unwrap();
        cb.abandon_trial();
        assert_eq!(cb.state(), CircuitState::Open);
        assert_eq!(cb.try_acquire(after), Some(Admission::Trial));
    }

    #[test]
    fn test_late_failure_does_not_extend_window() {
        let cb = breaker(1, 100);
        let opened = Instant::now();
        cb.record_failure(opened);
        cb.record_failure(opened + Duration::from_millis(90));
        assert!(cb.try_acquire(opened + Duration::from_millis(100)).is_some());
    }

    #[test]
    fn test_disabled_breaker_always_admits() {
        let cb = CircuitBreaker::new(
            "test/0",
            CircuitBreakerConfig {
                enabled: false,
                failure_threshold: 1,
                reset_timeout_ms: 1000,
            },
        );
        let now = Instant::now();
        for _ in 0..10 {
            cb.record_failure(now);
        }
        assert_eq!(cb.state(), CircuitState::Closed);
        assert_eq!(cb.try_acquire(now), Some(Admission::Normal));
        assert!(cb.is_available(now));
    }

    #[test]
    fn test_state_display() {
        assert_eq!(CircuitState::Closed.to_string(), "closed");
        assert_eq!(CircuitState::Open.to_string(), "open");
        assert_eq!(CircuitState::HalfOpen.to_string(), "half_open");
    }
}
