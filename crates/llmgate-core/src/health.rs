//! Concurrent provider health probes
//!
//! Every enabled endpoint of every provider is probed in parallel. Each probe
//! has its own timeout and the whole sweep shares one deadline, so a hung
//! vendor makes its provider `down` instead of stalling the report.

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::breaker::CircuitState;
use crate::config::HealthConfig;
use crate::error::AdapterError;
use crate::manager::{AiManager, RegisteredProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Down => write!(f, "down"),
        }
    }
}

/// Probe outcome for one endpoint
#[derive(Debug, Clone, Serialize)]
pub struct EndpointHealth {
    pub id: String,
    pub url: String,
    pub ok: bool,
    pub latency_ms: Option<u64>,
    pub error: Option<String>,
    pub circuit: CircuitState,
}

#[derive(Debug, Clone, Serialize)]
pub struct HealthRecord {
    pub provider: String,
    pub status: HealthStatus,
    /// Fastest successful probe
    pub latency_ms: Option<u64>,
    pub last_checked_at: DateTime<Utc>,
    pub endpoints: Vec<EndpointHealth>,
}

/// Roll-up over every provider
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub providers: BTreeMap<String, HealthRecord>,
    pub healthy_count: usize,
    pub degraded_count: usize,
    pub down_count: usize,
}

impl HealthReport {
    pub fn from_records(providers: BTreeMap<String, HealthRecord>) -> Self {
        let count = |status| providers.values().filter(|r| r.status == status).count();
        Self {
            healthy_count: count(HealthStatus::Healthy),
            degraded_count: count(HealthStatus::Degraded),
            down_count: count(HealthStatus::Down),
            providers,
        }
    }

    /// At least one provider can serve traffic
    pub fn is_serving(&self) -> bool {
        self.healthy_count + self.degraded_count > 0
    }

    pub fn summary(&self) -> String {
        format!(
            "{} healthy, {} degraded, {} down",
            self.healthy_count, self.degraded_count, self.down_count
        )
    }
}

const DEADLINE_EXCEEDED: &str = "overall health deadline exceeded";

pub struct HealthAggregator {
    manager: Arc<AiManager>,
    config: HealthConfig,
}

impl HealthAggregator {
    pub fn new(manager: Arc<AiManager>, config: HealthConfig) -> Self {
        Self { manager, config }
    }

    pub async fn get_all_providers_health(&self) -> BTreeMap<String, HealthRecord> {
        let deadline = Instant::now() + Duration::from_millis(self.config.overall_timeout_ms);
        let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
        let degraded_latency = Duration::from_millis(self.config.degraded_latency_ms);

        let sweeps = self.manager.providers().iter().map(|provider| async move {
            let endpoints = probe_provider(provider, probe_timeout, deadline).await;
            if endpoints.iter().any(|e| e.error.as_deref() == Some(DEADLINE_EXCEEDED)) {
                warn!(provider = provider.name(), "Health probes missed the overall deadline");
            }
            record(provider.name(), endpoints, degraded_latency)
        });

        join_all(sweeps)
            .await
            .into_iter()
            .map(|r| (r.provider.clone(), r))
            .collect()
    }

    pub async fn report(&self) -> HealthReport {
        let report = HealthReport::from_records(self.get_all_providers_health().await);
        if report.down_count == 0 {
            info!("Health: {}", report.summary());
        } else {
            warn!("Health: {}", report.summary());
        }
        report
    }
}

/// Each probe stops at its own timeout or the shared deadline, whichever
/// comes first; probes that finished in time keep their result.
async fn probe_provider(
    provider: &RegisteredProvider,
    timeout: Duration,
    deadline: Instant,
) -> Vec<EndpointHealth> {
    let model = provider.config().model.as_str();
    let probes = provider.pool().enabled().map(|slot| async move {
        let started = Instant::now();
        let own_deadline = started + timeout;
        let result = match tokio::time::timeout_at(
            own_deadline.min(deadline),
            provider.adapter().health_check(&slot.config, model),
        )
        .await
        {
            Ok(result) => result.map_err(|e| e.to_string()),
            Err(_) if deadline < own_deadline => Err(DEADLINE_EXCEEDED.to_string()),
            Err(_) => Err(AdapterError::Timeout.to_string()),
        };
        let latency_ms = started.elapsed().as_millis() as u64;
        debug!(endpoint = %slot.id, latency_ms = latency_ms, ok = result.is_ok(), "Probed endpoint");
        EndpointHealth {
            id: slot.id.clone(),
            url: slot.config.url.clone(),
            ok: result.is_ok(),
            latency_ms: result.is_ok().then_some(latency_ms),
            error: result.err(),
            circuit: slot.breaker().state(),
        }
    });
    join_all(probes).await
}

fn record(provider: &str, endpoints: Vec<EndpointHealth>, degraded_latency: Duration) -> HealthRecord {
    let fastest = endpoints.iter().filter_map(|e| e.latency_ms).min();
    HealthRecord {
        provider: provider.to_string(),
        status: rollup(&endpoints, degraded_latency),
        latency_ms: fastest,
        last_checked_at: Utc::now(),
        endpoints,
    }
}

fn rollup(endpoints: &[EndpointHealth], degraded_latency: Duration) -> HealthStatus {
    let succeeded = endpoints.iter().filter(|e| e.ok).count();
    if succeeded == 0 {
        return HealthStatus::Down;
    }
    let fastest = endpoints.iter().filter_map(|e| e.latency_ms).min().unwrap_or(u64::MAX);
    if succeeded == endpoints.len() && u128::from(fastest) < degraded_latency.as_millis() {
        HealthStatus::Healthy
    } else {
        HealthStatus::Degraded
    }
}
