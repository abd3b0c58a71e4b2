//! Request dispatch across providers
//!
//! [`AiManager`] owns the provider table, the shared rate limiter, the
//! response cache and the counters. It is constructed once by the
//! composition root and shared behind an `Arc`; the provider table is never
//! mutated after construction, so dispatch takes no global lock.

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cache::{ResponseCache, fingerprint};
use crate::config::{GatewayConfig, ProviderConfig};
use crate::error::{AdapterError, GatewayError, GatewayResponse};
use crate::limiter::{Budget, RateLimiter};
use crate::metrics::{GatewayMetrics, MetricsSnapshot};
use crate::pool::{EndpointLease, EndpointPool};
use crate::providers::{Completion, ProviderAdapter, adapter_for};
use crate::retry::RetryPolicy;
use crate::types::{ChatMessage, Prompt, RequestOptions, ResponseResult};

/// Per-user budgets are keyed on this when the request names no user
const ANONYMOUS_USER: &str = "anonymous";

#[derive(Debug, Clone, Default)]
pub struct ManagerSettings {
    /// Provider tried first when the caller states no preference
    pub default_provider: Option<String>,
}

impl From<&GatewayConfig> for ManagerSettings {
    fn from(config: &GatewayConfig) -> Self {
        Self {
            default_provider: config.default_provider.clone(),
        }
    }
}

/// A validated provider with its adapter and endpoint pool
pub struct RegisteredProvider {
    config: ProviderConfig,
    adapter: Arc<dyn ProviderAdapter>,
    pool: EndpointPool,
    retry: RetryPolicy,
}

impl RegisteredProvider {
    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn ProviderAdapter> {
        &self.adapter
    }

    pub fn pool(&self) -> &EndpointPool {
        &self.pool
    }
}

enum CallOutcome {
    Done(Result<Completion, AdapterError>),
    Cancelled,
}

pub struct AiManager {
    settings: ManagerSettings,
    providers: Vec<RegisteredProvider>,
    limiter: RateLimiter,
    cache: ResponseCache,
    metrics: GatewayMetrics,
}

impl AiManager {
    pub fn new(settings: ManagerSettings) -> Self {
        Self {
            settings,
            providers: Vec::new(),
            limiter: RateLimiter::new(),
            cache: ResponseCache::new(),
            metrics: GatewayMetrics::new(),
        }
    }

    /// Build a manager with one adapter per configured provider.
    ///
    /// Endpoint API keys must already be expanded (see
    /// [`crate::SecretsManager::resolve_config`]).
    pub fn from_config(config: &GatewayConfig) -> Result<Self, GatewayError> {
        config.validate()?;
        let mut manager = Self::new(ManagerSettings::from(config));
        for provider in &config.providers {
            manager.register_service(provider.clone(), adapter_for(&provider.vendor))?;
        }
        Ok(manager)
    }

    /// Validate and add a provider. Invalid configuration fails here, never
    /// at call time.
    pub fn register_service(
        &mut self,
        config: ProviderConfig,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Result<(), GatewayError> {
        config.validate()?;
        if self.find(&config.name).is_some() {
            return Err(GatewayError::config(&config.name, "provider already registered"));
        }
        info!(
            provider = %config.name,
            vendor = adapter.vendor(),
            model = %config.model,
            endpoints = config.endpoints.len(),
            "Registered provider"
        );
        self.providers.push(RegisteredProvider {
            pool: EndpointPool::new(&config),
            retry: RetryPolicy::from_config(&config.fallback),
            config,
            adapter,
        });
        Ok(())
    }

    pub fn provider_names(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.config.name.clone()).collect()
    }

    pub fn providers(&self) -> &[RegisteredProvider] {
        &self.providers
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    pub fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    fn find(&self, name: &str) -> Option<&RegisteredProvider> {
        self.providers.iter().find(|p| p.config.name == name)
    }

    /// Complete a single prompt. Never fails: errors come back inside the
    /// response.
    pub async fn generate_response(
        &self,
        prompt: &str,
        provider: Option<&str>,
        options: &RequestOptions,
    ) -> GatewayResponse<ResponseResult> {
        self.try_generate_response(prompt, provider, options)
            .await
            .into()
    }

    pub async fn try_generate_response(
        &self,
        prompt: &str,
        provider: Option<&str>,
        options: &RequestOptions,
    ) -> Result<ResponseResult, GatewayError> {
        self.dispatch(&Prompt::Text(prompt.to_string()), provider, options)
            .await
    }

    /// Complete a multi-turn conversation
    pub async fn chat_completion(
        &self,
        messages: &[ChatMessage],
        provider: Option<&str>,
        options: &RequestOptions,
    ) -> GatewayResponse<ResponseResult> {
        self.try_chat_completion(messages, provider, options)
            .await
            .into()
    }

    pub async fn try_chat_completion(
        &self,
        messages: &[ChatMessage],
        provider: Option<&str>,
        options: &RequestOptions,
    ) -> Result<ResponseResult, GatewayError> {
        self.dispatch(&Prompt::Messages(messages.to_vec()), provider, options)
            .await
    }

    /// Providers in the order this request will try them
    fn candidates(&self, preference: Option<&str>) -> Vec<&RegisteredProvider> {
        let preferred = preference.and_then(|name| {
            let found = self.find(name);
            if found.is_none() {
                warn!(provider = name, "Unknown provider requested, using default order");
            }
            found
        });
        let first = preferred
            .or_else(|| {
                self.settings
                    .default_provider
                    .as_deref()
                    .and_then(|name| self.find(name))
            })
            .or_else(|| self.providers.first());

        let Some(first) = first else {
            return Vec::new();
        };
        let mut order = vec![first];
        if first.config.fallback.enabled {
            order.extend(
                self.providers
                    .iter()
                    .filter(|p| p.config.name != first.config.name),
            );
        }
        order
    }

    fn budgets(
        &self,
        provider: &RegisteredProvider,
        lease: &EndpointLease,
        options: &RequestOptions,
    ) -> Vec<(String, Budget)> {
        let mut budgets = Vec::with_capacity(2);
        let max_rps = lease.config().max_rps;
        if max_rps > 0 {
            budgets.push((lease.id().to_string(), Budget::per_second(max_rps)));
        }
        let per_user = &provider.config.rate_limit;
        if per_user.enabled {
            let user = options.user_id.as_deref().unwrap_or(ANONYMOUS_USER);
            budgets.push((
                format!("{}:user:{}", lease.id(), user),
                Budget::new(
                    per_user.max_requests as usize,
                    Duration::from_millis(per_user.window_ms),
                ),
            ));
        }
        budgets
    }

    async fn dispatch(
        &self,
        prompt: &Prompt,
        preference: Option<&str>,
        options: &RequestOptions,
    ) -> Result<ResponseResult, GatewayError> {
        self.metrics.record_request();
        let candidates = self.candidates(preference);
        let Some(primary) = candidates.first() else {
            return Err(GatewayError::NoProvidersConfigured);
        };
        if options.cancel.as_ref().is_some_and(|t| t.is_cancelled()) {
            return Err(GatewayError::Cancelled);
        }

        let messages = prompt.to_messages();
        let cache_key = primary.config.cache.enabled.then(|| {
            fingerprint(
                options.model.as_deref().unwrap_or(&primary.config.model),
                &messages,
                options.temperature,
                options.max_tokens,
                options.locale.as_deref(),
            )
        });
        if let Some(key) = &cache_key
            && let Some(hit) = self.cache.get(key)
        {
            self.metrics.record_cache_hit();
            return Ok(hit);
        }

        let policy = primary.retry;
        let started = Instant::now();
        let mut attempts = 0u32;
        let mut last_error: Option<String> = None;
        // over budget for this request; never selected again
        let mut throttled: Vec<String> = Vec::new();
        let mut tried: Vec<String> = Vec::new();
        let mut pending_backoff: Option<Duration> = None;
        let mut last_provider: Option<&str> = None;

        // The first pass spreads attempts over endpoints not yet tried. Once
        // every candidate has been tried, the second pass lets the breakers
        // decide whether a tried endpoint may be called again.
        'passes: for revisit in [false, true] {
            if revisit && tried.is_empty() {
                break;
            }

            for provider in &candidates {
                loop {
                    if !policy.allows(attempts) {
                        break 'passes;
                    }

                    let skip: Vec<String> = if revisit {
                        throttled.clone()
                    } else {
                        throttled.iter().chain(&tried).cloned().collect()
                    };
                    let lease = match provider.pool.select(&skip) {
                        Ok(lease) => lease,
                        Err(e) => {
                            debug!(provider = provider.name(), revisit = revisit, "{}", e);
                            last_error.get_or_insert_with(|| e.to_string());
                            break;
                        }
                    };

                    // only slept once another call is actually lined up
                    if let Some(delay) = pending_backoff.take() {
                        debug!(backoff_ms = delay.as_millis() as u64, endpoint = lease.id(), "Backing off before next attempt");
                        if sleep_or_cancel(delay, options.cancel.as_ref()).await {
                            return Err(GatewayError::Cancelled);
                        }
                    }

                    let permit = match self.limiter.acquire(&self.budgets(provider, &lease, options)) {
                        Ok(permit) => permit,
                        Err(over_budget) => {
                            // not the endpoint's fault: no breaker record, no attempt
                            debug!(endpoint = lease.id(), "{}", over_budget);
                            last_error.get_or_insert_with(|| over_budget.to_string());
                            throttled.push(lease.id().to_string());
                            continue;
                        }
                    };

                    if last_provider.is_some_and(|name| name != provider.name()) {
                        self.metrics.record_fallback();
                        info!(provider = provider.name(), attempts = attempts, "Falling back to next provider");
                    }
                    last_provider = Some(provider.name());
                    if !tried.iter().any(|id| id == lease.id()) {
                        tried.push(lease.id().to_string());
                    }

                    let model = options.model.as_deref().unwrap_or(&provider.config.model);
                    self.metrics.record_vendor_call();
                    let call_started = Instant::now();
                    let result = match self.call_vendor(provider, &lease, model, prompt, &messages, options).await {
                        CallOutcome::Done(result) => result,
                        CallOutcome::Cancelled => {
                            info!(endpoint = lease.id(), "Request cancelled by caller");
                            return Err(GatewayError::Cancelled);
                        }
                    };
                    permit.commit();
                    attempts += 1;

                    match result {
                        Ok(completion) => {
                            debug!(
                                endpoint = lease.id(),
                                latency_ms = call_started.elapsed().as_millis() as u64,
                                "Vendor call succeeded"
                            );
                            lease.record_success();
                            let latency_ms = started.elapsed().as_millis() as u64;
                            self.metrics.record_latency(latency_ms);
                            let response = ResponseResult {
                                content: completion.content,
                                provider: provider.config.name.clone(),
                                model: completion.model.unwrap_or_else(|| model.to_string()),
                                usage: completion.usage,
                                cached: false,
                                latency_ms,
                                attempts,
                            };
                            if let Some(key) = cache_key {
                                self.cache.set(key, response.clone(), primary.config.cache.ttl());
                            }
                            return Ok(response);
                        }
                        Err(err) => {
                            warn!(
                                endpoint = lease.id(),
                                attempt = attempts,
                                max_attempts = policy.max_attempts,
                                "Vendor call failed: {}",
                                err
                            );
                            lease.record_failure();
                            self.metrics.record_failure();
                            let retryable = err.is_retryable();
                            last_error = Some(format!("{}: {}", provider.config.name, err));

                            if !retryable || !policy.enabled {
                                break 'passes;
                            }
                            pending_backoff = Some(policy.backoff(attempts));
                        }
                    }
                }
            }
        }

        self.metrics.record_exhausted();
        warn!(attempts = attempts, "All providers exhausted");
        Err(GatewayError::AllProvidersExhausted {
            attempts,
            last_error,
        })
    }

    /// One vendor call, bounded by the endpoint timeout and raced against
    /// the caller's cancel token
    async fn call_vendor(
        &self,
        provider: &RegisteredProvider,
        lease: &EndpointLease,
        model: &str,
        prompt: &Prompt,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> CallOutcome {
        let endpoint = lease.config();
        let request = match prompt {
            Prompt::Text(text) => provider.adapter.generate(endpoint, model, text, options),
            Prompt::Messages(_) => provider.adapter.chat(endpoint, model, messages, options),
        };
        let call = async {
            match tokio::time::timeout(endpoint.timeout(), request).await {
                Ok(result) => result,
                Err(_) => Err(AdapterError::Timeout),
            }
        };

        match &options.cancel {
            Some(token) => tokio::select! {
                _ = token.cancelled() => CallOutcome::Cancelled,
                result = call => CallOutcome::Done(result),
            },
            None => CallOutcome::Done(call.await),
        }
    }
}

/// Returns true if the caller cancelled during the sleep
async fn sleep_or_cancel(delay: Duration, cancel: Option<&CancellationToken>) -> bool {
    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => true,
            _ = tokio::time::sleep(delay) => false,
        },
        None => {
            tokio::time::sleep(delay).await;
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, EndpointConfig, FallbackConfig, RateLimitConfig, VendorConfig};
    use crate::error::ErrorKind;
    use crate::test_support::{MockAdapter, Reply};

    fn provider(name: &str, urls: &[&str]) -> ProviderConfig {
        let mut config = ProviderConfig::new(
            name,
            VendorConfig::OpenAi { organization: None },
            "model-x",
        );
        for url in urls {
            config = config.with_endpoint(EndpointConfig::new(*url, "k"));
        }
        config
    }

    fn manager(entries: Vec<(ProviderConfig, Arc<MockAdapter>)>) -> AiManager {
        let mut manager = AiManager::new(ManagerSettings::default());
        for (config, adapter) in entries {
            manager.register_service(config, adapter).unwrap();
        }
        manager
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_endpoint() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Text("hello")));
        let m = manager(vec![(provider("a", &["http://a0"]), a.clone())]);

        let result = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result.content, "hello");
        assert_eq!(result.provider, "a");
        assert_eq!(result.model, "model-x");
        assert_eq!(result.attempts, 1);
        assert!(!result.cached);
        assert_eq!(a.calls(), vec!["http://a0"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_falls_back_to_second_provider() {
        let a = Arc::new(
            MockAdapter::new("openai")
                .reply("http://a0", Reply::Status(503))
                .reply("http://a1", Reply::Status(500)),
        );
        let b = Arc::new(MockAdapter::new("claude").reply("http://b0", Reply::Text("from b")));
        let mut config_a = provider("a", &["http://a0", "http://a1"]);
        config_a.fallback.max_retries = 3;
        let m = manager(vec![
            (config_a, a.clone()),
            (provider("b", &["http://b0"]), b.clone()),
        ]);

        let result = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result.provider, "b");
        assert_eq!(result.content, "from b");
        assert!(result.attempts <= 3);
        assert_eq!(a.calls().len(), 2);

        let snap = m.metrics();
        assert_eq!(snap.fallbacks, 1);
        assert_eq!(snap.failures, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_never_exceed_max_retries() {
        let a = Arc::new(
            MockAdapter::new("openai")
                .reply("http://a0", Reply::Status(502))
                .reply("http://a1", Reply::Status(502))
                .reply("http://a2", Reply::Status(502)),
        );
        let b = Arc::new(MockAdapter::new("claude").reply("http://b0", Reply::Text("unreached")));
        let mut config_a = provider("a", &["http://a0", "http://a1", "http://a2"]);
        config_a.fallback.max_retries = 2;
        let m = manager(vec![(config_a, a.clone()), (provider("b", &["http://b0"]), b.clone())]);

        let err = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap_err();
        match err {
            GatewayError::AllProvidersExhausted { attempts, last_error } => {
                assert_eq!(attempts, 2);
                assert!(last_error.unwrap().contains("502"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(b.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_endpoint_retried_after_transient_failure() {
        let a = Arc::new(MockAdapter::new("openai").reply(
            "http://a0",
            Reply::Sequence(vec![Reply::Status(503), Reply::Text("recovered")]),
        ));
        let mut config = provider("a", &["http://a0"]);
        config.fallback.max_retries = 3;
        let m = manager(vec![(config, a.clone())]);

        let result = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result.content, "recovered");
        assert_eq!(result.attempts, 2);
        assert_eq!(a.calls(), vec!["http://a0", "http://a0"]);
        assert_eq!(m.metrics().vendor_calls, 2);
        assert_eq!(m.metrics().fallbacks, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_untried_provider_preferred_over_repeating_endpoint() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Status(503)));
        let b = Arc::new(MockAdapter::new("claude").reply(
            "http://b0",
            Reply::Sequence(vec![Reply::Status(500), Reply::Text("b second try")]),
        ));
        let mut config_a = provider("a", &["http://a0"]);
        config_a.fallback.max_retries = 4;
        let m = manager(vec![(config_a, a.clone()), (provider("b", &["http://b0"]), b.clone())]);

        let result = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap();
        // a0, b0, then the revisit pass: a0 again, b0 again
        assert_eq!(result.content, "b second try");
        assert_eq!(result.attempts, 4);
        assert_eq!(a.calls().len(), 2);
        assert_eq!(b.calls().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_backoff_when_nothing_left_to_try() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Status(503)));
        let mut config = provider("a", &["http://a0"]);
        config.fallback.max_retries = 3;
        config.fallback.backoff_ms = 5_000;
        config.circuit_breaker.failure_threshold = 1;
        let m = manager(vec![(config, a.clone())]);

        let started = Instant::now();
        let err = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersExhausted { attempts: 1, .. }));
        assert!(started.elapsed() < Duration::from_millis(5_000));
        assert_eq!(a.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_backoff_applied_between_attempts() {
        let a = Arc::new(MockAdapter::new("openai").reply(
            "http://a0",
            Reply::Sequence(vec![Reply::Status(503), Reply::Status(503), Reply::Text("third")]),
        ));
        let mut config = provider("a", &["http://a0"]);
        config.fallback.max_retries = 3;
        config.fallback.backoff_ms = 100;
        let m = manager(vec![(config, a)]);

        let started = Instant::now();
        let result = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result.attempts, 3);
        // 100ms after the first failure, 200ms after the second
        assert!(started.elapsed() >= Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_auth_error_stops_immediately() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Status(401)));
        let b = Arc::new(MockAdapter::new("claude").reply("http://b0", Reply::Text("unreached")));
        let m = manager(vec![(provider("a", &["http://a0"]), a), (provider("b", &["http://b0"]), b.clone())]);

        let response = m.generate_response("hi", None, &RequestOptions::default()).await;
        assert!(!response.success);
        assert_eq!(response.error_kind(), Some(ErrorKind::AllProvidersExhausted));
        assert!(b.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fallback_disabled_makes_one_attempt() {
        let a = Arc::new(
            MockAdapter::new("openai")
                .reply("http://a0", Reply::Status(503))
                .reply("http://a1", Reply::Text("unreached")),
        );
        let b = Arc::new(MockAdapter::new("claude").reply("http://b0", Reply::Text("unreached")));
        let mut config_a = provider("a", &["http://a0", "http://a1"]);
        config_a.endpoints[1].priority = 1;
        config_a.fallback = FallbackConfig {
            enabled: false,
            ..FallbackConfig::default()
        };
        let m = manager(vec![(config_a, a.clone()), (provider("b", &["http://b0"]), b.clone())]);

        let err = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::AllProvidersExhausted { attempts: 1, .. }));
        assert_eq!(a.calls(), vec!["http://a0"]);
        assert!(b.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_preference_and_default_provider() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Text("a")));
        let b = Arc::new(MockAdapter::new("claude").reply("http://b0", Reply::Text("b")));
        let mut m = AiManager::new(ManagerSettings {
            default_provider: Some("b".into()),
        });
        m.register_service(provider("a", &["http://a0"]), a).unwrap();
        m.register_service(provider("b", &["http://b0"]), b).unwrap();

        let opts = RequestOptions::default();
        assert_eq!(m.try_generate_response("q", None, &opts).await.unwrap().content, "b");
        assert_eq!(m.try_generate_response("q", Some("a"), &opts).await.unwrap().content, "a");
        // unknown preference falls back to the default order
        assert_eq!(m.try_generate_response("q", Some("nope"), &opts).await.unwrap().content, "b");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cache_hit_skips_vendor() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Text("cached answer")));
        let mut config = provider("a", &["http://a0"]);
        config.cache = CacheConfig {
            enabled: true,
            ttl: 3600,
        };
        let m = manager(vec![(config, a.clone())]);
        let opts = RequestOptions::default().with_temperature(0.2).with_locale("en");

        let first = m.try_generate_response("what is rust?", None, &opts).await.unwrap();
        let second = m.try_generate_response("what  is rust?", None, &opts).await.unwrap();
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(second.content, "cached answer");
        assert_eq!(a.calls().len(), 1);
        assert_eq!(m.metrics().cache_hits, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_moves_to_next_endpoint() {
        let a = Arc::new(
            MockAdapter::new("openai")
                .reply("http://slow", Reply::Hang)
                .reply("http://fast", Reply::Text("fast")),
        );
        let mut config = provider("a", &[]);
        config.endpoints = vec![
            EndpointConfig::new("http://slow", "k").with_timeout_ms(50),
            EndpointConfig::new("http://fast", "k").with_priority(1),
        ];
        let m = manager(vec![(config, a)]);

        let result = m
            .try_generate_response("hi", None, &RequestOptions::default())
            .await
            .unwrap();
        assert_eq!(result.content, "fast");
        assert_eq!(result.attempts, 2);
        assert_eq!(m.providers()[0].pool().snapshot()[0].consecutive_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_throttled_endpoint_is_skipped_without_penalty() {
        let a = Arc::new(
            MockAdapter::new("openai")
                .reply("http://a0", Reply::Text("primary"))
                .reply("http://a1", Reply::Text("secondary")),
        );
        let mut config = provider("a", &[]);
        config.endpoints = vec![
            EndpointConfig::new("http://a0", "k").with_max_rps(1),
            EndpointConfig::new("http://a1", "k").with_priority(1),
        ];
        let m = manager(vec![(config, a)]);
        let opts = RequestOptions::default();

        assert_eq!(m.try_generate_response("1", None, &opts).await.unwrap().content, "primary");
        let second = m.try_generate_response("2", None, &opts).await.unwrap();
        assert_eq!(second.content, "secondary");
        assert_eq!(second.attempts, 1);
        assert_eq!(m.providers()[0].pool().snapshot()[0].consecutive_failures, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_user_budget() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Text("ok")));
        let mut config = provider("a", &["http://a0"]);
        config.rate_limit = RateLimitConfig {
            enabled: true,
            max_requests: 1,
            window_ms: 60_000,
        };
        let m = manager(vec![(config, a)]);

        let alice = RequestOptions::default().with_user("alice");
        let bob = RequestOptions::default().with_user("bob");
        assert!(m.try_generate_response("q", None, &alice).await.is_ok());
        assert!(m.try_generate_response("q", None, &alice).await.is_err());
        assert!(m.try_generate_response("q", None, &bob).await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_releases_slot_and_records_nothing() {
        let a = Arc::new(MockAdapter::new("openai").reply("http://a0", Reply::Hang));
        let mut config = provider("a", &[]);
        config.endpoints = vec![EndpointConfig::new("http://a0", "k").with_max_rps(5)];
        config.cache.enabled = true;
        let m = manager(vec![(config, a)]);

        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let opts = RequestOptions::default().with_cancel(token);
        let err = m.try_generate_response("hi", None, &opts).await.unwrap_err();
        assert!(matches!(err, GatewayError::Cancelled));
        assert_eq!(m.limiter().in_window("a/0", Duration::from_secs(1)), 0);
        assert_eq!(m.providers()[0].pool().snapshot()[0].consecutive_failures, 0);
        assert!(m.cache().is_empty());
    }

    #[test]
    fn test_register_rejects_invalid_and_duplicate() {
        let mut m = AiManager::new(ManagerSettings::default());
        let adapter = Arc::new(MockAdapter::new("openai"));

        let err = m
            .register_service(provider("a", &[]), adapter.clone())
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);

        m.register_service(provider("a", &["http://a0"]), adapter.clone())
            .unwrap();
        let err = m
            .register_service(provider("a", &["http://a0"]), adapter)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigInvalid);
        assert_eq!(m.provider_names(), vec!["a"]);
    }

    #[test]
    fn test_from_config_requires_providers() {
        let err = AiManager::from_config(&GatewayConfig::default()).err().unwrap();
        assert_eq!(err.kind(), ErrorKind::NoProvidersConfigured);
    }

    #[tokio::test]
    async fn test_empty_manager_reports_no_providers() {
        let m = AiManager::new(ManagerSettings::default());
        let response = m.generate_response("hi", None, &RequestOptions::default()).await;
        assert_eq!(response.error_kind(), Some(ErrorKind::NoProvidersConfigured));
    }
}
