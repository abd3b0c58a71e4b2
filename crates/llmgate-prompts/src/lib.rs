//! llmgate-prompts: locale-aware prompt templates
//!
//! Templates are addressed by `(category, name, locale)`. A missing locale
//! falls back through its language (`ja-JP` → `ja`) to the default locale,
//! and `{{variable}}` placeholders are filled from caller-supplied values.

pub mod loader;
pub mod source;

pub use loader::{PromptError, PromptLoader, substitute};
pub use source::{FsTemplateSource, MemoryTemplateSource, TemplateSource};
