//! Scripted adapter shared by the unit tests

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

use crate::config::EndpointConfig;
use crate::error::AdapterError;
use crate::providers::{Completion, ProviderAdapter};
use crate::types::{ChatMessage, RequestOptions, Usage};

pub(crate) enum Reply {
    Text(&'static str),
    Status(u16),
    Hang,
    /// The nth call gets the nth reply; the last one repeats
    Sequence(Vec<Reply>),
}

/// Answers by endpoint URL and records every call it receives
pub(crate) struct MockAdapter {
    vendor: &'static str,
    replies: HashMap<String, Reply>,
    calls: Mutex<Vec<String>>,
}

impl MockAdapter {
    pub(crate) fn new(vendor: &'static str) -> Self {
        Self {
            vendor,
            replies: HashMap::new(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn reply(mut self, url: &str, reply: Reply) -> Self {
        self.replies.insert(url.to_string(), reply);
        self
    }

    pub(crate) fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    async fn answer(&self, endpoint: &EndpointConfig) -> Result<String, AdapterError> {
        let call_index = {
            let mut calls = self.calls.lock().unwrap();
            let previous = calls.iter().filter(|url| **url == endpoint.url).count();
            calls.push(endpoint.url.clone());
            previous
        };
        let reply = match self.replies.get(&endpoint.url) {
            Some(Reply::Sequence(steps)) => steps.get(call_index).or(steps.last()),
            other => other,
        };
        match reply {
            Some(Reply::Text(text)) => Ok(text.to_string()),
            Some(Reply::Status(status)) => Err(AdapterError::Vendor {
                status: *status,
                message: "scripted failure".into(),
            }),
            Some(Reply::Hang) => std::future::pending().await,
            Some(Reply::Sequence(_)) => Err(AdapterError::Network("nested sequence".into())),
            None => Err(AdapterError::Network("no reply scripted".into())),
        }
    }
}

#[async_trait]
impl ProviderAdapter for MockAdapter {
    fn vendor(&self) -> &str {
        self.vendor
    }

    async fn chat(
        &self,
        endpoint: &EndpointConfig,
        _model: &str,
        _messages: &[ChatMessage],
        _options: &RequestOptions,
    ) -> Result<Completion, AdapterError> {
        let content = self.answer(endpoint).await?;
        Ok(Completion {
            content,
            model: None,
            usage: Usage::new(1, 1),
        })
    }

    async fn health_check(&self, endpoint: &EndpointConfig, _model: &str) -> Result<(), AdapterError> {
        self.answer(endpoint).await.map(|_| ())
    }
}
