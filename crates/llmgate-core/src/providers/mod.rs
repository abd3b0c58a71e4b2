//! Vendor adapters
//!
//! Every vendor implements [`ProviderAdapter`]. An adapter is stateless with
//! respect to endpoints: the [`crate::EndpointPool`] picks the endpoint and
//! passes it in, and the adapter owns wire-format translation, auth headers,
//! and mapping vendor failures into [`AdapterError`].

pub mod anthropic;
pub mod google;
mod http;
pub mod openai;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::{EndpointConfig, VendorConfig};
use crate::error::AdapterError;
use crate::types::{ChatMessage, RequestOptions, Usage};

pub use anthropic::ClaudeAdapter;
pub use google::GeminiAdapter;
pub use openai::OpenAiAdapter;

/// What a vendor returned for one call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub content: String,
    /// Model name as reported by the vendor, when it reports one
    pub model: Option<String>,
    pub usage: Usage,
}

/// Capability interface implemented once per vendor
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    /// Vendor identifier (e.g. "openai", "claude")
    fn vendor(&self) -> &str;

    /// Multi-turn completion
    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        model: &str,
        messages: &[ChatMessage],
        options: &RequestOptions,
    ) -> Result<Completion, AdapterError>;

    /// Single-prompt completion
    async fn generate(
        &self,
        endpoint: &EndpointConfig,
        model: &str,
        prompt: &str,
        options: &RequestOptions,
    ) -> Result<Completion, AdapterError> {
        self.chat(endpoint, model, &[ChatMessage::user(prompt)], options)
            .await
    }

    /// Cheap authenticated probe of one endpoint
    async fn health_check(&self, endpoint: &EndpointConfig, model: &str) -> Result<(), AdapterError>;
}

/// Build the adapter for a configured vendor
pub fn adapter_for(vendor: &VendorConfig) -> Arc<dyn ProviderAdapter> {
    match vendor {
        VendorConfig::OpenAi { organization } => Arc::new(OpenAiAdapter::new(organization.clone())),
        VendorConfig::Claude { anthropic_version } => {
            Arc::new(ClaudeAdapter::new(anthropic_version.clone()))
        }
        VendorConfig::Gemini => Arc::new(GeminiAdapter::new()),
    }
}
