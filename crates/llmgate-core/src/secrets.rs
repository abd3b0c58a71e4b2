//! Credential resolution for endpoint API keys
//!
//! Endpoint `api_key` values may reference secrets as `$secret{NAME}`.
//! References are expanded once, before providers are registered, from an
//! environment allowlist, a secrets directory, or an in-memory map.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, warn};

use crate::config::GatewayConfig;

/// Where `$secret{NAME}` values come from
#[async_trait]
pub trait SecretSource: Send + Sync {
    fn name(&self) -> &str;
    /// `Ok(None)` when the secret does not exist
    async fn lookup(&self, key: &str) -> Result<Option<String>>;
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecretsConfig {
    #[serde(default)]
    pub backend: SecretBackend,
    #[serde(default)]
    pub dir: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SecretBackend {
    #[default]
    Env,
    File,
    Memory,
}

/// Environment variables that may be read as secrets. Anything else stays
/// unresolved, so a config file cannot be used to read arbitrary env vars.
const API_KEY_ENV_VARS: &[&str] = &[
    "OPENAI_API_KEY",
    "OPENAI_API_KEY_SECONDARY",
    "ANTHROPIC_API_KEY",
    "ANTHROPIC_API_KEY_SECONDARY",
    "GEMINI_API_KEY",
    "GOOGLE_AI_API_KEY",
    "LLMGATE_API_KEY",
];

pub struct EnvSecrets;

#[async_trait]
impl SecretSource for EnvSecrets {
    fn name(&self) -> &str {
        "env"
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        if !API_KEY_ENV_VARS.contains(&key) {
            warn!(var = key, "Env lookup rejected: not an allowlisted API key variable");
            return Ok(None);
        }
        Ok(std::env::var(key).ok())
    }
}

/// `<dir>/<NAME>`, one key per file, surrounding whitespace trimmed
pub struct SecretsDir {
    dir: PathBuf,
}

impl SecretsDir {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl SecretSource for SecretsDir {
    fn name(&self) -> &str {
        "file"
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        let safe = !key.is_empty()
            && !key.contains("..")
            && !key.chars().any(|c| matches!(c, '/' | '\\' | '\0'));
        if !safe {
            return Err(anyhow!("Invalid secret name '{}'", key.escape_default()));
        }

        let path = self.dir.join(key);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content.trim().to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(anyhow!("Failed to read secret file {}: {}", path.display(), e)),
        }
    }
}

#[derive(Default)]
pub struct StaticSecrets {
    values: HashMap<String, String>,
}

impl StaticSecrets {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }
}

#[async_trait]
impl SecretSource for StaticSecrets {
    fn name(&self) -> &str {
        "memory"
    }

    async fn lookup(&self, key: &str) -> Result<Option<String>> {
        Ok(self.values.get(key).cloned())
    }
}

/// `$secret{NAME}` with an env-style name
const SECRET_REF_PATTERN: &str = r"\$secret\{([A-Za-z0-9_]+)\}";

/// Resolves `$secret{NAME}` references
pub struct SecretsManager {
    source: Box<dyn SecretSource>,
}

impl SecretsManager {
    pub fn new(source: Box<dyn SecretSource>) -> Self {
        Self { source }
    }

    pub fn from_config(config: &SecretsConfig) -> Self {
        let source: Box<dyn SecretSource> = match config.backend {
            SecretBackend::Env => Box::new(EnvSecrets),
            SecretBackend::File => {
                let dir = config.dir.as_deref().unwrap_or("/run/secrets");
                Box::new(SecretsDir::new(dir))
            }
            SecretBackend::Memory => Box::new(StaticSecrets::new()),
        };
        Self { source }
    }

    pub fn backend_name(&self) -> &str {
        self.source.name()
    }

    /// Names referenced by `text`, in order of appearance
    pub fn references(text: &str) -> Vec<String> {
        let Ok(re) = Regex::new(SECRET_REF_PATTERN) else {
            return Vec::new();
        };
        re.captures_iter(text).map(|cap| cap[1].to_string()).collect()
    }

    /// Expand every reference in `text`. Unknown names are left as written
    /// and returned alongside the result.
    pub async fn expand(&self, text: &str) -> Result<(String, Vec<String>)> {
        let re = Regex::new(SECRET_REF_PATTERN).map_err(|e| anyhow!("Invalid regex: {}", e))?;

        let mut expanded = String::with_capacity(text.len());
        let mut missing = Vec::new();
        let mut cursor = 0;
        for cap in re.captures_iter(text) {
            let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
                continue;
            };
            expanded.push_str(&text[cursor..whole.start()]);
            match self.source.lookup(name.as_str()).await? {
                Some(value) => {
                    debug!(secret = name.as_str(), len = value.len(), "Expanded secret");
                    expanded.push_str(&value);
                }
                None => {
                    missing.push(name.as_str().to_string());
                    expanded.push_str(whole.as_str());
                }
            }
            cursor = whole.end();
        }
        expanded.push_str(&text[cursor..]);
        Ok((expanded, missing))
    }

    /// Expand the `api_key` of every endpoint in place. Fails if any
    /// reference cannot be resolved, naming the endpoint but not the value.
    pub async fn resolve_config(&self, config: &mut GatewayConfig) -> Result<()> {
        let mut unresolved = Vec::new();
        for provider in &mut config.providers {
            for (index, endpoint) in provider.endpoints.iter_mut().enumerate() {
                let (key, missing) = self.expand(&endpoint.api_key).await?;
                endpoint.api_key = key;
                for name in missing {
                    warn!(endpoint = %format!("{}/{}", provider.name, index), secret = %name, "Secret not found");
                    unresolved.push(format!("{}/{} -> {}", provider.name, index, name));
                }
            }
        }
        if unresolved.is_empty() {
            Ok(())
        } else {
            Err(anyhow!(
                "Unresolved secrets via '{}' provider: {}",
                self.source.name(),
                unresolved.join(", ")
            ))
        }
    }
}
