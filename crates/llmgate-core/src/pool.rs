//! Per-provider endpoint selection
//!
//! Endpoints are grouped into priority tiers (lower first). Within the first
//! tier that has an endpoint the circuit breaker admits, one endpoint is
//! picked at random in proportion to its weight.

use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::time::Instant;
use tracing::debug;

use crate::breaker::{Admission, CircuitBreaker, CircuitState};
use crate::config::{EndpointConfig, ProviderConfig};

/// Every endpoint of the provider is disabled, excluded, or circuit-open
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("no endpoint available for provider '{provider}'")]
pub struct NoEndpointAvailable {
    pub provider: String,
}

/// An endpoint plus its breaker state
#[derive(Debug)]
pub struct EndpointSlot {
    pub id: String,
    pub config: EndpointConfig,
    breaker: CircuitBreaker,
}

impl EndpointSlot {
    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Point-in-time view of one endpoint, for health and diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct EndpointSnapshot {
    pub id: String,
    pub url: String,
    pub priority: i64,
    pub weight: f64,
    pub enabled: bool,
    pub circuit: CircuitState,
    pub consecutive_failures: u32,
}

pub struct EndpointPool {
    provider: String,
    slots: Vec<Arc<EndpointSlot>>,
}

impl EndpointPool {
    pub fn new(config: &ProviderConfig) -> Self {
        let slots = config
            .endpoints
            .iter()
            .enumerate()
            .map(|(i, endpoint)| {
                let id = format!("{}/{}", config.name, i);
                Arc::new(EndpointSlot {
                    breaker: CircuitBreaker::new(id.clone(), config.circuit_breaker.clone()),
                    id,
                    config: endpoint.clone(),
                })
            })
            .collect();
        Self {
            provider: config.name.clone(),
            slots,
        }
    }

    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Enabled endpoints in configuration order
    pub fn enabled(&self) -> impl Iterator<Item = &Arc<EndpointSlot>> {
        self.slots.iter().filter(|s| s.config.enabled)
    }

    /// Select an endpoint, skipping the ids in `exclude`
    pub fn select(&self, exclude: &[String]) -> Result<EndpointLease, NoEndpointAvailable> {
        self.select_with(exclude, &mut rand::thread_rng(), Instant::now())
    }

    pub fn select_with<R: Rng + ?Sized>(
        &self,
        exclude: &[String],
        rng: &mut R,
        now: Instant,
    ) -> Result<EndpointLease, NoEndpointAvailable> {
        let mut tiers: BTreeMap<i64, Vec<&Arc<EndpointSlot>>> = BTreeMap::new();
        for slot in self.enabled().filter(|s| !exclude.contains(&s.id)) {
            tiers.entry(slot.config.priority).or_default().push(slot);
        }

        for (priority, tier) in tiers {
            let mut candidates: Vec<&Arc<EndpointSlot>> = tier
                .into_iter()
                .filter(|s| s.breaker.is_available(now))
                .collect();

            while !candidates.is_empty() {
                let index = pick_weighted(&candidates, rng);
                let slot = candidates.swap_remove(index);
                // Another request may have taken the HalfOpen trial since the
                // availability check; fall back to the rest of the tier.
                if let Some(admission) = slot.breaker.try_acquire(now) {
                    debug!(
                        endpoint = %slot.id,
                        priority = priority,
                        trial = admission == Admission::Trial,
                        "Selected endpoint"
                    );
                    return Ok(EndpointLease {
                        slot: Arc::clone(slot),
                        admission,
                        resolved: false,
                    });
                }
            }
        }

        Err(NoEndpointAvailable {
            provider: self.provider.clone(),
        })
    }

    pub fn snapshot(&self) -> Vec<EndpointSnapshot> {
        self.slots
            .iter()
            .map(|s| EndpointSnapshot {
                id: s.id.clone(),
                url: s.config.url.clone(),
                priority: s.config.priority,
                weight: s.config.weight,
                enabled: s.config.enabled,
                circuit: s.breaker.state(),
                consecutive_failures: s.breaker.consecutive_failures(),
            })
            .collect()
    }
}

/// Weight-proportional index; uniform when every weight is zero
fn pick_weighted<R: Rng + ?Sized>(candidates: &[&Arc<EndpointSlot>], rng: &mut R) -> usize {
    let total: f64 = candidates.iter().map(|s| s.config.weight).sum();
    if total <= 0.0 {
        return rng.gen_range(0..candidates.len());
    }
    let mut target = rng.gen_range(0.0..total);
    for (i, slot) in candidates.iter().enumerate() {
        if target < slot.config.weight {
            return i;
        }
        target -= slot.config.weight;
    }
    // float rounding can leave target just past the last bucket
    candidates
        .iter()
        .rposition(|s| s.config.weight > 0.0)
        .unwrap_or(candidates.len() - 1)
}

/// A selected endpoint.
///
/// Report the outcome with [`EndpointLease::record_success`] or
/// [`EndpointLease::record_failure`]. A lease dropped without an outcome
/// (throttled, cancelled) hands back any HalfOpen trial it was holding.
#[derive(Debug)]
pub struct EndpointLease {
    slot: Arc<EndpointSlot>,
    admission: Admission,
    resolved: bool,
}

impl EndpointLease {
    pub fn id(&self) -> &str {
        &self.slot.id
    }

    pub fn config(&self) -> &EndpointConfig {
        &self.slot.config
    }

    pub fn is_trial(&self) -> bool {
        self.admission == Admission::Trial
    }

    pub fn record_success(mut self) {
        self.resolved = true;
        self.slot.breaker.record_success();
    }

    pub fn record_failure(mut self) {
        self.resolved = true;
        self.slot.breaker.record_failure(Instant::now());
    }
}

impl Drop for EndpointLease {
    fn drop(&mut self) {
        if !self.resolved && self.admission == Admission::Trial {
            self.slot.breaker.abandon_trial();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CircuitBreakerConfig, VendorConfig};
    use rand::SeedableRng;
    use rand::rngs::StdRng;
    use std::collections::HashMap;
    use std::time::Duration;

    fn provider(endpoints: Vec<EndpointConfig>, threshold: u32, reset_ms: u64) -> ProviderConfig {
        let mut config = ProviderConfig::new(
            "openai",
            VendorConfig::OpenAi { organization: None },
            "gpt-4o",
        );
        config.endpoints = endpoints;
        config.circuit_breaker = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: threshold,
            reset_timeout_ms: reset_ms,
        };
        config
    }

    fn ep(url: &str, priority: i64, weight: f64) -> EndpointConfig {
        EndpointConfig::new(url, "k")
            .with_priority(priority)
            .with_weight(weight)
    }

    #[test]
    fn test_lower_priority_tier_first() {
        let pool = EndpointPool::new(&provider(
            vec![ep("http://e2", 2, 50.0), ep("http://e1", 1, 100.0)],
            5,
            1000,
        ));
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..20 {
            let lease = pool.select_with(&[], &mut rng, Instant::now()).unwrap();
            assert_eq!(lease.config().url, "http://e1");
        }
    }

    #[test]
    fn test_open_endpoint_falls_through_to_next_tier() {
        let pool = EndpointPool::new(&provider(
            vec![ep("http://e1", 1, 100.0), ep("http://e2", 2, 50.0)],
            5,
            60_000,
        ));
        for _ in 0..5 {
            pool.select(&[]).unwrap().record_failure();
        }
        let lease = pool.select(&[]).unwrap();
        assert_eq!(lease.id(), "openai/1");
        assert_eq!(pool.snapshot()[0].circuit, CircuitState::Open);
    }

    #[test]
    fn test_weight_proportional_within_tier() {
        let pool = EndpointPool::new(&provider(
            vec![ep("http://a", 0, 3.0), ep("http://b", 0, 1.0), ep("http://c", 0, 0.0)],
            5,
            1000,
        ));
        let mut rng = StdRng::seed_from_u64(42);
        let mut counts: HashMap<String, usize> = HashMap::new();
        for _ in 0..4000 {
            let lease = pool.select_with(&[], &mut rng, Instant::now()).unwrap();
            *counts.entry(lease.config().url.clone()).or_default() += 1;
            lease.record_success();
        }
        let a = counts["http://a"] as f64;
        let b = counts["http://b"] as f64;
        assert!(!counts.contains_key("http://c"));
        let ratio = a / b;
        assert!(ratio > 2.5 && ratio < 3.5, "ratio was {ratio}");
    }

    #[test]
    fn test_all_zero_weights_still_selectable() {
        let pool = EndpointPool::new(&provider(
            vec![ep("http://a", 0, 0.0), ep("http://b", 0, 0.0)],
            5,
            1000,
        ));
        assert!(pool.select(&[]).is_ok());
    }

    #[test]
    fn test_exclude_and_disabled() {
        let pool = EndpointPool::new(&provider(
            vec![ep("http://a", 0, 1.0), ep("http://b", 0, 1.0).disabled()],
            5,
            1000,
        ));
        let err = pool.select(&["openai/0".to_string()]).unwrap_err();
        assert_eq!(err.provider, "openai");
        assert_eq!(pool.enabled().count(), 1);
    }

    #[test]
    fn test_half_open_admits_exactly_one_trial() {
        let pool = EndpointPool::new(&provider(vec![ep("http://a", 0, 1.0)], 1, 100));
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(1);

        pool.select_with(&[], &mut rng, start).unwrap().record_failure();
        assert!(pool.select_with(&[], &mut rng, start).is_err());

        let later = Instant::now() + Duration::from_millis(200);
        let trial = pool.select_with(&[], &mut rng, later).unwrap();
        assert!(trial.is_trial());
        assert!(pool.select_with(&[], &mut rng, later).is_err());

        trial.record_success();
        assert!(pool.select_with(&[], &mut rng, later).is_ok());
    }

    #[test]
    fn test_dropped_trial_lease_is_abandoned() {
        let pool = EndpointPool::new(&provider(vec![ep("http://a", 0, 1.0)], 1, 100));
        let mut rng = StdRng::seed_from_u64(1);
        pool.select(&[]).unwrap().record_failure();

        let later = Instant::now() + Duration::from_millis(200);
        let trial = pool.select_with(&[], &mut rng, later).unwrap();
        drop(trial);
        assert_eq!(pool.snapshot()[0].circuit, CircuitState::Open);
        assert!(pool.select_with(&[], &mut rng, later).unwrap().is_trial());
    }
}
