//! Gateway configuration
//!
//! Provider entries are validated once, at registration, by
//! [`ProviderConfig::validate`]. Nothing is re-checked at call time.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use crate::error::GatewayError;
use crate::secrets::SecretsConfig;

/// Top-level configuration document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Provider tried first when the caller states no preference
    #[serde(default)]
    pub default_provider: Option<String>,
    #[serde(default)]
    pub secrets: SecretsConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
}

impl GatewayConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse gateway configuration")
    }

    /// Read and parse a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml_str(&content)
    }

    /// Validate every provider plus cross-provider constraints
    pub fn validate(&self) -> Result<(), GatewayError> {
        if self.providers.is_empty() {
            return Err(GatewayError::NoProvidersConfigured);
        }
        let mut seen = HashSet::new();
        for provider in &self.providers {
            provider.validate()?;
            if !seen.insert(provider.name.as_str()) {
                return Err(GatewayError::config(&provider.name, "duplicate provider name"));
            }
        }
        if let Some(default) = &self.default_provider
            && !seen.contains(default.as_str())
        {
            return Err(GatewayError::config(
                default,
                "default_provider does not name a configured provider",
            ));
        }
        Ok(())
    }
}

/// Vendor selection plus vendor-specific settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "vendor", rename_all = "lowercase")]
pub enum VendorConfig {
    #[serde(rename = "openai")]
    OpenAi {
        #[serde(default)]
        organization: Option<String>,
    },
    Claude {
        #[serde(default = "default_anthropic_version")]
        anthropic_version: String,
    },
    Gemini,
}

fn default_anthropic_version() -> String {
    "2023-06-01".to_string()
}

impl VendorConfig {
    pub fn name(&self) -> &'static str {
        match self {
            Self::OpenAi { .. } => "openai",
            Self::Claude { .. } => "claude",
            Self::Gemini => "gemini",
        }
    }
}

/// One configured provider
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub name: String,
    #[serde(flatten)]
    pub vendor: VendorConfig,
    pub model: String,
    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
    #[serde(default)]
    pub fallback: FallbackConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, vendor: VendorConfig, model: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vendor,
            model: model.into(),
            endpoints: Vec::new(),
            fallback: FallbackConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }

    pub fn with_endpoint(mut self, endpoint: EndpointConfig) -> Self {
        self.endpoints.push(endpoint);
        self
    }

    /// Reject anything that would leave a broken provider registered
    pub fn validate(&self) -> Result<(), GatewayError> {
        let name = self.name.trim();
        let invalid = |reason: String| Err(GatewayError::config(&self.name, reason));

        if name.is_empty() {
            return invalid("provider name is empty".into());
        }
        if self.model.trim().is_empty() {
            return invalid("model is empty".into());
        }
        if self.endpoints.is_empty() {
            return invalid("no endpoints configured".into());
        }
        if !self.endpoints.iter().any(|e| e.enabled) {
            return invalid("every endpoint is disabled".into());
        }

        for (i, endpoint) in self.endpoints.iter().enumerate() {
            match url::Url::parse(&endpoint.url) {
                Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {}
                Ok(parsed) => {
                    return invalid(format!(
                        "endpoint {i}: unsupported URL scheme '{}'",
                        parsed.scheme()
                    ));
                }
                Err(e) => return invalid(format!("endpoint {i}: invalid URL: {e}")),
            }
            if endpoint.priority < 0 {
                return invalid(format!("endpoint {i}: priority must be >= 0"));
            }
            if !endpoint.weight.is_finite() || endpoint.weight < 0.0 {
                return invalid(format!("endpoint {i}: weight must be a finite value >= 0"));
            }
            if endpoint.timeout_ms == 0 {
                return invalid(format!("endpoint {i}: timeout_ms must be > 0"));
            }
        }

        if self.fallback.max_retries == 0 {
            return invalid("fallback.max_retries must be >= 1".into());
        }
        if self.circuit_breaker.enabled {
            if self.circuit_breaker.failure_threshold == 0 {
                return invalid("circuit_breaker.failure_threshold must be >= 1".into());
            }
            if self.circuit_breaker.reset_timeout_ms == 0 {
                return invalid("circuit_breaker.reset_timeout_ms must be > 0".into());
            }
        }
        if self.cache.enabled && self.cache.ttl == 0 {
            return invalid("cache.ttl must be > 0".into());
        }
        if self.rate_limit.enabled && (self.rate_limit.max_requests == 0 || self.rate_limit.window_ms == 0) {
            return invalid("rate_limit.max_requests and rate_limit.window_ms must be > 0".into());
        }
        Ok(())
    }
}

/// One vendor-reachable URL with its credential and quota
#[derive(Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Lower values are tried first
    #[serde(default)]
    pub priority: i64,
    /// Requests per second; 0 disables the per-endpoint budget
    #[serde(default)]
    pub max_rps: u32,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_weight() -> f64 {
    1.0
}

fn default_true() -> bool {
    true
}

impl EndpointConfig {
    pub fn new(url: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            api_key: api_key.into(),
            priority: 0,
            max_rps: 0,
            timeout_ms: default_timeout_ms(),
            weight: default_weight(),
            enabled: true,
        }
    }

    pub fn with_priority(mut self, priority: i64) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_weight(mut self, weight: f64) -> Self {
        self.weight = weight;
        self
    }

    pub fn with_max_rps(mut self, max_rps: u32) -> Self {
        self.max_rps = max_rps;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl std::fmt::Debug for EndpointConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EndpointConfig")
            .field("url", &self.url)
            .field("api_key", &"[REDACTED]")
            .field("priority", &self.priority)
            .field("max_rps", &self.max_rps)
            .field("timeout_ms", &self.timeout_ms)
            .field("weight", &self.weight)
            .field("enabled", &self.enabled)
            .finish()
    }
}

/// Cross-provider fallback and retry budget
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Total vendor calls allowed per request, across all providers
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    250
}

fn default_max_backoff_ms() -> u64 {
    8_000
}

impl Default for FallbackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retries: default_max_retries(),
            backoff_ms: default_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_reset_timeout_ms")]
    pub reset_timeout_ms: u64,
}

fn default_failure_threshold() -> u32 {
    5
}

fn default_reset_timeout_ms() -> u64 {
    30_000
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: default_failure_threshold(),
            reset_timeout_ms: default_reset_timeout_ms(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn reset_timeout(&self) -> Duration {
        Duration::from_millis(self.reset_timeout_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Time to live, in seconds
    #[serde(default = "default_ttl")]
    pub ttl: u64,
}

fn default_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: default_ttl(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl)
    }
}

/// Optional per-user budget layered on top of each endpoint's `max_rps`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_ms")]
    pub window_ms: u64,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_ms() -> u64 {
    60_000
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: default_max_requests(),
            window_ms: default_window_ms(),
        }
    }
}

/// Health probe deadlines and thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthConfig {
    #[serde(default = "default_probe_timeout_ms")]
    pub probe_timeout_ms: u64,
    #[serde(default = "default_overall_timeout_ms")]
    pub overall_timeout_ms: u64,
    #[serde(default = "default_degraded_latency_ms")]
    pub degraded_latency_ms: u64,
}

fn default_probe_timeout_ms() -> u64 {
    5_000
}

fn default_overall_timeout_ms() -> u64 {
    10_000
}

fn default_degraded_latency_ms() -> u64 {
    2_000
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: default_probe_timeout_ms(),
            overall_timeout_ms: default_overall_timeout_ms(),
            degraded_latency_ms: default_degraded_latency_ms(),
        }
    }
}
