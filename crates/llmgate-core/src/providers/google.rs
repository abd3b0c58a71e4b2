//! Gemini (Generative Language API) adapter

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::http::{client, join_url, send_json, send_probe};
use super::{Completion, ProviderAdapter};
use crate::config::EndpointConfig;
use crate::error::AdapterError;
use crate::types::{ChatMessage, ChatRole, RequestOptions, Usage};

pub struct GeminiAdapter {
    http: Client,
}

impl GeminiAdapter {
    pub fn new() -> Self {
        Self { http: client() }
    }
}

impl Default for GeminiAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'static str>,
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    model_version: Option<String>,
}

#[derive(Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Deserialize)]
struct CandidatePart {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u32,
    #[serde(default)]
    candidates_token_count: u32,
    #[serde(default)]
    total_token_count: u32,
}

fn build_request<'a>(messages: &'a [ChatMessage], options: &RequestOptions) -> GenerateRequest<'a> {
    let system_parts: Vec<Part<'a>> = messages
        .iter()
        .filter(|m| m.role == ChatRole::System)
        .map(|m| Part { text: &m.content })
        .collect();

    let contents = messages
        .iter()
        .filter_map(|m| {
            let role = match m.role {
                ChatRole::User => "user",
                ChatRole::Assistant => "model",
                ChatRole::System => return None,
            };
            Some(Content {
                role: Some(role),
                parts: vec![Part { text: &m.content }],
            })
        })
        .collect();

    let generation_config = (options.temperature.is_some() || options.max_tokens.is_some())
        .then_some(GenerationConfig {
            temperature: options.temperature,
            max_output_tokens: options.max_tokens,
        });

    GenerateRequest {
        contents,
        system_instruction: (!system_parts.is_empty()).then_some(Content {
            role: None,
            parts: system_parts,
        }),
        generation_config,
    }
}

#[async_trait]
impl ProviderAdapter for GeminiAdapter {
    fn vendor(&self) -> &str {
        "gemini"
    }

    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<Completion, AdapterError> {
        let body = build_request(messages, options);
        let url = join_url(&endpoint.url, &format!("models/{model}:generateContent"));
        debug!(url = %url, messages = messages.len(), "Gemini generateContent request");

        let request = self
            .http
            .post(&url)
            .header("x-goog-api-key", &endpoint.api_key)
            .timeout(endpoint.timeout())
            .json(&body);

        let response: GenerateResponse = send_json(request).await?;
        let content: String = response
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.content)
            .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
            .ok_or_else(|| AdapterError::InvalidResponse("response has no candidates".into()))?;

        let usage = response
            .usage_metadata
            .map(|u| Usage::reported(u.prompt_token_count, u.candidates_token_count, u.total_token_count))
            .unwrap_or_default();

        Ok(Completion {
            content,
            model: response.model_version,
            usage,
        })
    }

    async fn health_check(&self, endpoint: &EndpointConfig, model: &str) -> Result<(), AdapterError> {
        let request = self
            .http
            .get(join_url(&endpoint.url, &format!("models/{model}")))
            .header("x-goog-api-key", &endpoint.api_key)
            .timeout(endpoint.timeout());
        send_probe(request).await
    }
}
