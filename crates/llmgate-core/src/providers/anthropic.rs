//! Claude (Anthropic Messages API) adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{client, join_url, send_json, send_probe};
use super::{Completion, ProviderAdapter};
use crate::config::EndpointConfig;
use crate::error::AdapterError;
use crate::types::{ChatMessage, ChatRole, RequestOptions, Usage};

/// The Messages API requires `max_tokens`
const DEFAULT_MAX_TOKENS: u32 = 1024;

pub struct ClaudeAdapter {
    http: Client,
    anthropic_version: String,
}

impl ClaudeAdapter {
    pub fn new(anthropic_version: impl Into<String>) -> Self {
        Self {
            http: client(),
            anthropic_version: anthropic_version.into(),
        }
    }
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// System turns go in the top-level `system` field; the rest keep order.
fn split_system(messages: &[ChatMessage]) -> (Option<String>, Vec<WireMessage<'_>>) {
    let system: Vec<&str> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| m.content.as_str())
        .collect();
    let turns = messages
        .iter()
        .filter_map(|m| match m.role {
            ChatRole::User => Some(WireMessage {
                role: "user",
                content: &m.content,
            }),
            ChatRole::Assistant => Some(WireMessage {
                role: "assistant",
                content: &m.content,
            }),
            ChatRole::System => None,
        })
        .collect();
    let system = (!system.is_empty()).then(|| system.join("\n\n"));
    (system, turns)
}

#[async_trait]
impl ProviderAdapter for ClaudeAdapter {
    fn vendor(&self) -> &str {
        "claude"
    }

    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<Completion, AdapterError> {
        let (system, turns) = split_system(messages);
        let body = MessagesRequest {
            model,
            max_tokens: options.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            messages: turns,
            system,
            temperature: options.temperature,
        };

        let url = join_url(&endpoint.url, "messages");
        debug!(url = %url, model = model, messages = messages.len(), "Claude messages request");

        let request = self
            .http
            .post(&url)
            .header("x-api-key", &endpoint.api_key)
            .header("anthropic-version", &self.anthropic_version)
            .timeout(endpoint.timeout())
            .json(&body);

        let response: MessagesResponse = send_json(request).await?;
        let text: Vec<String> = response
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .filter_map(|b| b.text)
            .collect();
        if text.is_empty() {
            return Err(AdapterError::InvalidResponse("response has no text blocks".into()));
        }

        let usage = response
            .usage
            .map(|u| Usage::new(u.input_tokens, u.output_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content: text.join(""),
            model: response.model,
            usage,
        })
    }

    async fn health_check(&self, endpoint: &EndpointConfig, _model: &str) -> Result<(), AdapterError> {
        let request = self
            .http
            .get(join_url(&endpoint.url, "models"))
            .header("x-api-key", &endpoint.api_key)
            .header("anthropic-version", &self.anthropic_version)
            .timeout(endpoint.timeout());
        send_probe(request).await
    }
}
