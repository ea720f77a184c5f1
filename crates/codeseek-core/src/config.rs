use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::CodeseekError;

/// Top-level configuration loaded from `.codeseek.toml`.
///
/// Every field has a default, so an empty file (or no file at all) is valid.
///
/// # Examples
///
/// ```
/// use codeseek_core::CodeseekConfig;
///
/// let config = CodeseekConfig::default();
/// assert_eq!(config.embedding.provider, "hash");
/// assert_eq!(config.search.top_k, 5);
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CodeseekConfig {
    /// Embedding provider settings.
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    /// Where and how the index is written.
    #[serde(default)]
    pub index: IndexConfig,
    /// Query defaults.
    #[serde(default)]
    pub search: SearchConfig,
    /// Which files the scanner picks up.
    #[serde(default)]
    pub scan: ScanConfig,
}

impl CodeseekConfig {
    /// Load configuration from a TOML file at `path`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Io`] if the file cannot be read, or
    /// [`CodeseekError::Toml`] if the content is not valid TOML.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use codeseek_core::CodeseekConfig;
    /// use std::path::Path;
    ///
    /// let config = CodeseekConfig::from_file(Path::new(".codeseek.toml")).unwrap();
    /// ```
    pub fn from_file(path: &Path) -> Result<Self, CodeseekError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Toml`] if parsing fails, or
    /// [`CodeseekError::Config`] if a value is out of range.
    ///
    /// # Examples
    ///
    /// ```
    /// use codeseek_core::CodeseekConfig;
    ///
    /// let toml = r#"
    /// [embedding]
    /// dimensions = 64
    /// "#;
    /// let config = CodeseekConfig::from_toml(toml).unwrap();
    /// assert_eq!(config.embedding.dimensions, 64);
    /// ```
    pub fn from_toml(content: &str) -> Result<Self, CodeseekError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), CodeseekError> {
        if self.embedding.dimensions == 0 {
            return Err(CodeseekError::Config(
                "embedding.dimensions must be at least 1".into(),
            ));
        }
        if self.embedding.batch_size == 0 {
            return Err(CodeseekError::Config(
                "embedding.batch_size must be at least 1".into(),
            ));
        }
        if self.index.files_per_batch == 0 {
            return Err(CodeseekError::Config(
                "index.files_per_batch must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Configuration for the embedding provider.
///
/// `provider = "hash"` needs no network access or key; `"openai"` and
/// `"voyage"` call an OpenAI-compatible `/embeddings` endpoint.
///
/// # Examples
///
/// ```
/// use codeseek_core::EmbeddingConfig;
///
/// let config = EmbeddingConfig::default();
/// assert_eq!(config.dimensions, 384);
/// assert_eq!(config.batch_size, 64);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: `"hash"`, `"openai"` or `"voyage"` (default: `"hash"`).
    #[serde(default = "default_embedding_provider")]
    pub provider: String,
    /// Model name sent to remote providers.
    #[serde(default = "default_embedding_model")]
    pub model: String,
    /// API key; falls back to the provider's environment variable.
    pub api_key: Option<String>,
    /// Override for the provider's API base URL.
    pub base_url: Option<String>,
    /// Vector dimension D (default: 384).
    #[serde(default = "default_embedding_dimensions")]
    pub dimensions: usize,
    /// Texts per embedding request (default: 64).
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

fn default_embedding_provider() -> String {
    "hash".into()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".into()
}

fn default_embedding_dimensions() -> usize {
    384
}

fn default_batch_size() -> usize {
    64
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            model: default_embedding_model(),
            api_key: None,
            base_url: None,
            dimensions: default_embedding_dimensions(),
            batch_size: default_batch_size(),
        }
    }
}

/// Index storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexConfig {
    /// Index directory, relative to the repository root (default: `.codeseek/index`).
    #[serde(default = "default_index_dir")]
    pub dir: PathBuf,
    /// Number of files parsed and committed per batch (default: 256).
    #[serde(default = "default_files_per_batch")]
    pub files_per_batch: usize,
}

fn default_index_dir() -> PathBuf {
    PathBuf::from(".codeseek/index")
}

fn default_files_per_batch() -> usize {
    256
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            dir: default_index_dir(),
            files_per_batch: default_files_per_batch(),
        }
    }
}

/// Query defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Number of results returned when no limit is given (default: 5).
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    /// Attach call-graph neighbors to each result (default: false).
    #[serde(default)]
    pub neighbors: bool,
}

fn default_top_k() -> usize {
    5
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            neighbors: false,
        }
    }
}

/// File selection for repository scans.
///
/// # Examples
///
/// ```
/// use codeseek_core::ScanConfig;
///
/// let scan = ScanConfig::default();
/// assert_eq!(scan.extensions, vec!["py"]);
/// assert!(scan.exclude_dirs.iter().any(|d| d == "__pycache__"));
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanConfig {
    /// File extensions (without the dot) to index.
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    /// Directory names pruned from the walk.
    #[serde(default = "default_exclude_dirs")]
    pub exclude_dirs: Vec<String>,
}

fn default_extensions() -> Vec<String> {
    vec!["py".into()]
}

fn default_exclude_dirs() -> Vec<String> {
    [
        ".git",
        "__pycache__",
        "venv",
        ".venv",
        "env",
        "node_modules",
        "dist",
        "build",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            exclude_dirs: default_exclude_dirs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let config = CodeseekConfig::default();
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.embedding.dimensions, 384);
        assert_eq!(config.embedding.batch_size, 64);
        assert!(config.embedding.api_key.is_none());
        assert_eq!(config.index.dir, PathBuf::from(".codeseek/index"));
        assert_eq!(config.index.files_per_batch, 256);
        assert_eq!(config.search.top_k, 5);
        assert!(!config.search.neighbors);
        assert_eq!(config.scan.extensions, vec!["py"]);
        assert_eq!(config.scan.exclude_dirs.len(), 8);
    }

    #[test]
    fn parse_full_toml() {
        let toml = r#"
[embedding]
provider = "openai"
model = "text-embedding-3-large"
base_url = "http://localhost:8080/v1"
dimensions = 3072
batch_size = 16

[index]
dir = "out/idx"
files_per_batch = 10

[search]
top_k = 12
neighbors = true

[scan]
extensions = ["py", "pyi"]
exclude_dirs = [".tox"]
"#;
        let config = CodeseekConfig::from_toml(toml).unwrap();
        assert_eq!(config.embedding.provider, "openai");
        assert_eq!(
            config.embedding.base_url.as_deref(),
            Some("http://localhost:8080/v1")
        );
        assert_eq!(config.embedding.dimensions, 3072);
        assert_eq!(config.embedding.batch_size, 16);
        assert_eq!(config.index.dir, PathBuf::from("out/idx"));
        assert_eq!(config.index.files_per_batch, 10);
        assert_eq!(config.search.top_k, 12);
        assert!(config.search.neighbors);
        assert_eq!(config.scan.extensions, vec!["py", "pyi"]);
        assert_eq!(config.scan.exclude_dirs, vec![".tox"]);
    }

    #[test]
    fn empty_toml_gives_defaults() {
        let config = CodeseekConfig::from_toml("").unwrap();
        assert_eq!(config.embedding.provider, "hash");
        assert_eq!(config.search.top_k, 5);
    }

    #[test]
    fn zero_dimensions_rejected() {
        let err = CodeseekConfig::from_toml("[embedding]\ndimensions = 0\n").unwrap_err();
        assert!(err.to_string().contains("dimensions"), "{err}");
    }

    #[test]
    fn zero_files_per_batch_rejected() {
        let result = CodeseekConfig::from_toml("[index]\nfiles_per_batch = 0\n");
        assert!(matches!(result, Err(CodeseekError::Config(_))));
    }

    #[test]
    fn invalid_toml_returns_error() {
        let result = CodeseekConfig::from_toml("{{invalid}}");
        assert!(matches!(result, Err(CodeseekError::Toml(_))));
    }
}
