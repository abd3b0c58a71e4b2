//! OpenAI chat completions adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{client, join_url, send_json, send_probe};
use super::{Completion, ProviderAdapter};
use crate::config::EndpointConfig;
use crate::error::AdapterError;
use crate::types::{ChatMessage, RequestOptions, Usage};

pub struct OpenAiAdapter {
    http: Client,
    organization: Option<String>,
}

impl OpenAiAdapter {
    pub fn new(organization: Option<String>) -> Self {
        Self {
            http: client(),
            organization,
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<&'a str>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: String,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

#[async_trait]
impl ProviderAdapter for OpenAiAdapter {
    fn vendor(&self) -> &str {
        "openai"
    }

    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<Completion, AdapterError> {
        let body = ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: m.role.to_string(),
                    content: &m.content,
                })
                .collect(),
            temperature: options.temperature,
            max_tokens: options.max_tokens,
            user: options.user_id.as_deref(),
        };

        let url = join_url(&endpoint.url, "chat/completions");
        debug!(url = %url, model = model, messages = messages.len(), "OpenAI chat request");

        let mut request = self
            .http
            .post(&url)
            .bearer_auth(&endpoint.api_key)
            .timeout(endpoint.timeout())
            .json(&body);
        if let Some(org) = &self.organization {
            request = request.header("OpenAI-Organization", org);
        }

        let response: ChatResponse = send_json(request).await?;
        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| AdapterError::InvalidResponse("response has no choices".into()))?;

        let usage = response
            .usage
            .map(|u| Usage::reported(u.prompt_tokens, u.completion_tokens, u.total_tokens))
            .unwrap_or_default();

        Ok(Completion {
            content,
            model: response.model,
            usage,
        })
    }

    async fn health_check(&self, endpoint: &EndpointConfig, _model: &str) -> Result<(), AdapterError> {
        let request = self
            .http
            .get(join_url(&endpoint.url, "models"))
            .bearer_auth(&endpoint.api_key)
            .timeout(endpoint.timeout());
        send_probe(request).await
    }
}
