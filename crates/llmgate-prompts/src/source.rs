//! Where template text comes from

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::debug;

use crate::loader::PromptError;

const DEFAULT_EXTENSION: &str = "md";

/// Resolves one exact `(locale, category, name)`; fallback is the loader's job.
#[async_trait]
pub trait TemplateSource: Send + Sync {
    /// `Ok(None)` when the template does not exist for that locale
    async fn fetch(&self, locale: &str, category: &str, name: &str) -> Result<Option<String>, PromptError>;
}

/// Reads `<root>/<locale>/<category>/<name>.<ext>`
pub struct FsTemplateSource {
    root: PathBuf,
    extension: String,
}

impl FsTemplateSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            extension: DEFAULT_EXTENSION.to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    fn path_for(&self, locale: &str, category: &str, name: &str) -> PathBuf {
        self.root
            .join(locale)
            .join(category)
            .join(format!("{}.{}", name, self.extension))
    }
}

#[async_trait]
impl TemplateSource for FsTemplateSource {
    async fn fetch(&self, locale: &str, category: &str, name: &str) -> Result<Option<String>, PromptError> {
        let path = self.path_for(locale, category, name);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                debug!("Loaded template {}", path.display());
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PromptError::Io {
                path: path.display().to_string(),
                message: e.to_string(),
            }),
        }
    }
}

/// Templates held in memory, for tests and embedded defaults
#[derive(Default)]
pub struct MemoryTemplateSource {
    templates: HashMap<(String, String, String), String>,
}

impl MemoryTemplateSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(
        &mut self,
        locale: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
        body: impl Into<String>,
    ) {
        self.templates
            .insert((locale.into(), category.into(), name.into()), body.into());
    }

    pub fn with(
        mut self,
        locale: impl Into<String>,
        category: impl Into<String>,
        name: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        self.insert(locale, category, name, body);
        self
    }
}

#[async_trait]
impl TemplateSource for MemoryTemplateSource {
    async fn fetch(&self, locale: &str, category: &str, name: &str) -> Result<Option<String>, PromptError> {
        let key = (locale.to_string(), category.to_string(), name.to_string());
        Ok(self.templates.get(&key).cloned())
    }
}
