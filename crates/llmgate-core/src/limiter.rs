//! Sliding-window rate limiting for endpoints and users

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Request budget for one key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Budget {
    pub max_requests: usize,
    pub window: Duration,
}

impl Budget {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// `max_rps` requests per rolling second
    pub fn per_second(max_rps: u32) -> Self {
        Self::new(max_rps as usize, Duration::from_secs(1))
    }
}

/// Budget exceeded; the caller should try another endpoint
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("rate limit exceeded for '{key}'")]
pub struct Throttled {
    pub key: String,
}

/// A sliding-window rate limiter keyed by arbitrary strings.
///
/// Each key gets its own window of admission timestamps. On every check,
/// expired timestamps are pruned and the count is compared against the
/// budget. Locking is per shard of the underlying map, never global.
#[derive(Clone, Default)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a single key and record the admission if allowed.
    ///
    /// Returns `false` without recording when the window is full.
    pub fn check_and_record(&self, key: &str, budget: Budget) -> bool {
        self.admit(key, budget, Instant::now()).is_some()
    }

    fn admit(&self, key: &str, budget: Budget, now: Instant) -> Option<Instant> {
        let mut entry = self.windows.entry(key.to_string()).or_default();
        let window = entry.value_mut();

        // Prune expired timestamps
        while window
            .front()
            .is_some_and(|&t| now.saturating_duration_since(t) >= budget.window)
        {
            window.pop_front();
        }

        if window.len() >= budget.max_requests {
            warn!(
                key = key,
                in_window = window.len(),
                limit = budget.max_requests,
                "Rate limit exceeded"
            );
            return None;
        }

        window.push_back(now);
        Some(now)
    }

    fn release(&self, key: &str, at: Instant) {
        if let Some(mut entry) = self.windows.get_mut(key) {
            let window = entry.value_mut();
            if let Some(pos) = window.iter().rposition(|&t| t == at) {
                window.remove(pos);
                debug!(key = key, "Released rate limiter slot");
            }
        }
    }

    /// Admit a request against every budget, or none of them.
    ///
    /// If a later budget is exhausted the slots taken from earlier ones are
    /// handed back before returning [`Throttled`].
    pub fn acquire(&self, budgets: &[(String, Budget)]) -> Result<RatePermit, Throttled> {
        let now = Instant::now();
        let mut permit = RatePermit {
            limiter: self.clone(),
            slots: Vec::with_capacity(budgets.len()),
            committed: false,
        };
        for (key, budget) in budgets {
            match self.admit(key, *budget, now) {
                Some(at) => permit.slots.push((key.clone(), at)),
                // dropping the permit returns what was taken so far
                None => return Err(Throttled { key: key.clone() }),
            }
        }
        Ok(permit)
    }

    /// Admissions currently counted for `key`
    pub fn in_window(&self, key: &str, window: Duration) -> usize {
        let now = Instant::now();
        self.windows
            .get(key)
            .map(|w| {
                w.iter()
                    .filter(|&&t| now.saturating_duration_since(t) < window)
                    .count()
            })
            .unwrap_or(0)
    }
}

/// Slots held by an admitted request.
///
/// A permit that is dropped without [`RatePermit::commit`] (the request was
/// cancelled before it reached the vendor or mid-call) gives its slots back.
pub struct RatePermit {
    limiter: RateLimiter,
    slots: Vec<(String, Instant)>,
    committed: bool,
}

impl RatePermit {
    /// Keep the slots counted: the vendor call ran to an outcome
    pub fn commit(mut self) {
        self.committed = true;
    }
}

impl Drop for RatePermit {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        for (key, at) in self.slots.drain(..) {
            self.limiter.release(&key, at);
        }
    }
}
