//! Config file location and loading

use anyhow::{Context, Result};
use llmgate_core::{GatewayConfig, SecretsManager};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// `<config_dir>/llmgate`, falling back to the working directory
pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("llmgate")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn default_prompts_dir() -> PathBuf {
    config_dir().join("prompts")
}

/// Parse, validate and expand secrets. Validation runs before expansion so
/// errors never echo a resolved key.
pub async fn load(path: Option<&Path>) -> Result<GatewayConfig> {
    let path = path.map(Path::to_path_buf).unwrap_or_else(default_config_path);
    debug!("Loading config from {}", path.display());
    let mut config = GatewayConfig::load(&path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {}", path.display()))?;

    let secrets = SecretsManager::from_config(&config.secrets);
    secrets
        .resolve_config(&mut config)
        .await
        .context("Failed to resolve endpoint secrets")?;
    info!(
        "Loaded {} provider(s) from {} (secrets: {})",
        config.providers.len(),
        path.display(),
        secrets.backend_name()
    );
    Ok(config)
}
