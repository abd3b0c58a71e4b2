//! llmgate-core: multi-provider LLM request gateway
//!
//! Routes prompts and chat turns to OpenAI, Claude, and Gemini endpoints.
//! Each provider owns a weighted, priority-tiered [`EndpointPool`] whose
//! endpoints are guarded by a circuit breaker and a sliding-window
//! [`RateLimiter`]. The [`AiManager`] composes these with a TTL
//! [`ResponseCache`] and a bounded [`RetryPolicy`] to fail over across
//! providers without ever leaking a raw vendor error to the caller.

pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod health;
pub mod limiter;
pub mod manager;
pub mod metrics;
pub mod pool;
pub mod providers;
pub mod retry;
pub mod secrets;
pub mod types;

#[cfg(test)]
mod test_support;

pub use breaker::{CircuitBreaker, CircuitState};
pub use cache::{ResponseCache, fingerprint};
pub use config::{
    CacheConfig, CircuitBreakerConfig, EndpointConfig, FallbackConfig, GatewayConfig,
    HealthConfig, ProviderConfig, RateLimitConfig, VendorConfig,
};
pub use error::{AdapterError, ErrorBody, ErrorKind, GatewayError, GatewayResponse};
pub use health::{EndpointHealth, HealthAggregator, HealthRecord, HealthReport, HealthStatus};
pub use limiter::{RateLimiter, RatePermit, Throttled};
pub use manager::{AiManager, ManagerSettings, RegisteredProvider};
pub use metrics::{GatewayMetrics, MetricsSnapshot};
pub use pool::{EndpointLease, EndpointPool, EndpointSnapshot, NoEndpointAvailable};
pub use providers::{Completion, ProviderAdapter, adapter_for};
pub use retry::RetryPolicy;
pub use secrets::{SecretsConfig, SecretsManager, SecretSource};
pub use types::{ChatMessage, ChatRole, Prompt, RequestOptions, ResponseResult, Usage};
