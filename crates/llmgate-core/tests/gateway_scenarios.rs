//! End-to-end dispatch against mocked vendor HTTP APIs

use llmgate_core::{AiManager, ErrorKind, GatewayConfig, GatewayError, RequestOptions};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn openai_ok(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "gpt-4o",
        "choices": [{"message": {"role": "assistant", "content": content}}],
        "usage": {"prompt_tokens": 4, "completion_tokens": 2, "total_tokens": 6}
    }))
}

fn claude_ok(content: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "model": "claude-sonnet-4",
        "content": [{"type": "text", "text": content}],
        "usage": {"input_tokens": 4, "output_tokens": 2}
    }))
}

fn manager(toml: &str) -> AiManager {
    let config = GatewayConfig::from_toml_str(toml).unwrap();
    AiManager::from_config(&config).unwrap()
}

#[tokio::test]
async fn test_open_circuit_routes_sixth_call_to_next_tier() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/e1/chat/completions"))
        .respond_with(ResponseTemplate::new(500))
        .expect(5)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/e2/chat/completions"))
        .respond_with(openai_ok("from e2"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let gateway = manager(&format!(
        r#"
        [[providers]]
        name = "openai"
        vendor = "openai"
        model = "gpt-4o"

        [providers.fallback]
        enabled = false

        [providers.circuit_breaker]
        failure_threshold = 5
        reset_timeout_ms = 60000

        [[providers.endpoints]]
        url = "{uri}/e1"
        api_key = "k1"
        priority = 1
        weight = 100.0

        [[providers.endpoints]]
        url = "{uri}/e2"
        api_key = "k2"
        priority = 2
        weight = 50.0
        "#
    ));

    let opts = RequestOptions::default();
    for _ in 0..5 {
        let response = gateway.generate_response("hi", None, &opts).await;
        assert!(!response.success);
    }
    let sixth = gateway.generate_response("hi", None, &opts).await;
    assert!(sixth.success);
    assert_eq!(sixth.data.unwrap().content, "from e2");
}

#[tokio::test]
async fn test_identical_request_is_served_from_cache() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(openai_ok("cached"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let gateway = manager(&format!(
        r#"
        [[providers]]
        name = "openai"
        vendor = "openai"
        model = "gpt-4o"

        [providers.cache]
        enabled = true
        ttl = 3600

        [[providers.endpoints]]
        url = "{uri}"
        api_key = "k"
        "#
    ));

    let opts = RequestOptions::default()
        .with_temperature(0.7)
        .with_max_tokens(100)
        .with_locale("en");
    let first = gateway.try_generate_response("Recommend a tea", None, &opts).await.unwrap();
    let second = gateway.try_generate_response("Recommend a tea", None, &opts).await.unwrap();

    assert!(!first.cached);
    assert!(second.cached);
    assert_eq!(second.content, "cached");
    assert_eq!(gateway.metrics().vendor_calls, 1);
}

#[tokio::test]
async fn test_every_endpoint_failing_exhausts_within_max_retries() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let uri = server.uri();
    let gateway = manager(&format!(
        r#"
        [[providers]]
        name = "openai"
        vendor = "openai"
        model = "gpt-4o"

        [providers.fallback]
        max_retries = 3
        backoff_ms = 10

        [[providers.endpoints]]
        url = "{uri}/a0"
        api_key = "k"

        [[providers.endpoints]]
        url = "{uri}/a1"
        api_key = "k"

        [[providers.endpoints]]
        url = "{uri}/a2"
        api_key = "k"

        [[providers]]
        name = "claude"
        vendor = "claude"
        model = "claude-sonnet-4"

        [[providers.endpoints]]
        url = "{uri}/b0"
        api_key = "k"
        "#
    ));

    let response = gateway
        .generate_response("hi", None, &RequestOptions::default())
        .await;
    assert!(!response.success);
    assert_eq!(response.error_kind(), Some(ErrorKind::AllProvidersExhausted));

    let received = server.received_requests().await.unwrap();
    assert!(received.len() <= 3, "made {} vendor calls", received.len());
}

#[tokio::test]
async fn test_failing_provider_falls_back_to_next() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/openai/chat/completions"))
        .respond_with(ResponseTemplate::new(502))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/claude/messages"))
        .respond_with(claude_ok("from claude"))
        .expect(1)
        .mount(&server)
        .await;

    let uri = server.uri();
    let gateway = manager(&format!(
        r#"
        default_provider = "openai"

        [[providers]]
        name = "openai"
        vendor = "openai"
        model = "gpt-4o"

        [providers.fallback]
        max_retries = 3
        backoff_ms = 10

        [[providers.endpoints]]
        url = "{uri}/openai"
        api_key = "k"

        [[providers]]
        name = "claude"
        vendor = "claude"
        model = "claude-sonnet-4"

        [[providers.endpoints]]
        url = "{uri}/claude"
        api_key = "k"
        "#
    ));

    let result = gateway
        .try_generate_response("hi", None, &RequestOptions::default())
        .await
        .unwrap();
    assert_eq!(result.provider, "claude");
    assert_eq!(result.content, "from claude");
    assert!(result.attempts <= 3);
}

#[test]
fn test_invalid_config_fails_at_construction() {
    let config = GatewayConfig::from_toml_str(
        r#"
        [[providers]]
        name = "openai"
        vendor = "openai"
        model = "gpt-4o"

        [[providers.endpoints]]
        url = "ftp://nope"
        api_key = "k"
        "#,
    )
    .unwrap();
    match AiManager::from_config(&config) {
        Err(GatewayError::ConfigInvalid { provider, .. }) => assert_eq!(provider, "openai"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("invalid endpoint URL was accepted"),
    }
}
