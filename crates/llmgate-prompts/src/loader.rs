//! Prompt resolution and variable substitution

use llmgate_core::{ErrorBody, ErrorKind, GatewayResponse};
use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

use crate::source::TemplateSource;

pub const DEFAULT_LOCALE: &str = "en";

/// `{{ name }}` with optional inner whitespace
const PLACEHOLDER_PATTERN: &str = r"\{\{\s*([A-Za-z0-9_.\-]+)\s*\}\}";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PromptError {
    #[error("template '{category}/{name}' not found for locale '{locale}' or its fallbacks")]
    TemplateNotFound {
        category: String,
        name: String,
        locale: String,
    },

    #[error("invalid template {field} '{value}'")]
    InvalidSegment { field: &'static str, value: String },

    #[error("failed to read template {path}: {message}")]
    Io { path: String, message: String },
}

impl PromptError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidSegment { .. } => ErrorKind::InvalidRequest,
            Self::TemplateNotFound { .. } | Self::Io { .. } => ErrorKind::TemplateNotFound,
        }
    }
}

/// Reject anything that could escape the template root
fn validate_segment(field: &'static str, value: &str) -> Result<(), PromptError> {
    let valid = !value.is_empty()
        && !value.starts_with('.')
        && !value.contains("..")
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(PromptError::InvalidSegment {
            field,
            value: value.to_string(),
        })
    }
}

/// Replace `{{variable}}` placeholders. Placeholders with no matching
/// variable are left as written.
pub fn substitute(template: &str, variables: &HashMap<String, String>) -> String {
    if variables.is_empty() {
        return template.to_string();
    }
    let Ok(re) = Regex::new(PLACEHOLDER_PATTERN) else {
        return template.to_string();
    };
    re.replace_all(template, |caps: &Captures<'_>| match variables.get(&caps[1]) {
        Some(value) => value.clone(),
        None => caps[0].to_string(),
    })
    .into_owned()
}

pub struct PromptLoader {
    source: Arc<dyn TemplateSource>,
    default_locale: String,
}

impl PromptLoader {
    pub fn new(source: Arc<dyn TemplateSource>) -> Self {
        Self {
            source,
            default_locale: DEFAULT_LOCALE.to_string(),
        }
    }

    pub fn with_default_locale(mut self, locale: impl Into<String>) -> Self {
        self.default_locale = locale.into();
        self
    }

    /// Locales tried in order: `ja-JP` → `ja` → default
    pub fn locale_chain(&self, locale: &str) -> Vec<String> {
        let mut chain: Vec<String> = Vec::with_capacity(3);
        let mut push = |candidate: &str| {
            if !candidate.is_empty() && !chain.iter().any(|c| c.eq_ignore_ascii_case(candidate)) {
                chain.push(candidate.to_string());
            }
        };
        let locale = locale.trim();
        push(locale);
        if let Some((language, _region)) = locale.split_once(['-', '_']) {
            push(language);
        }
        push(&self.default_locale);
        chain
    }

    pub async fn load_prompt(
        &self,
        category: &str,
        name: &str,
        locale: &str,
        variables: Option<&HashMap<String, String>>,
    ) -> Result<String, PromptError> {
        validate_segment("category", category)?;
        validate_segment("name", name)?;

        for candidate in self.locale_chain(locale) {
            validate_segment("locale", &candidate)?;
            if let Some(template) = self.source.fetch(&candidate, category, name).await? {
                if candidate != locale {
                    debug!("Template {}/{} fell back from '{}' to '{}'", category, name, locale, candidate);
                }
                return Ok(match variables {
                    Some(vars) => substitute(&template, vars),
                    None => template,
                });
            }
        }

        warn!("Template {}/{} not found for locale '{}'", category, name, locale);
        Err(PromptError::TemplateNotFound {
            category: category.to_string(),
            name: name.to_string(),
            locale: locale.to_string(),
        })
    }

    /// [`PromptLoader::load_prompt`] wrapped in the boundary envelope
    pub async fn load_prompt_response(
        &self,
        category: &str,
        name: &str,
        locale: &str,
        variables: Option<&HashMap<String, String>>,
    ) -> GatewayResponse<String> {
        match self.load_prompt(category, name, locale, variables).await {
            Ok(prompt) => GatewayResponse::ok(prompt),
            Err(e) => GatewayResponse::fail(ErrorBody::new(e.kind(), e.to_string())),
        }
    }
}
