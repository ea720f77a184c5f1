use std::path::PathBuf;

/// Errors that can occur across the codeseek workspace.
///
/// File-level failures ([`CodeseekError::Read`], [`CodeseekError::Parse`])
/// are absorbed by the parser; everything else reaches the caller of the
/// pipeline or query operation. The binary converts to a `miette` report at
/// the boundary.
///
/// # Examples
///
/// ```
/// use codeseek_core::CodeseekError;
///
/// let err = CodeseekError::NotFound(42);
/// assert!(err.to_string().contains("42"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum CodeseekError {
    /// Filesystem I/O failure.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A source file could not be read.
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Invalid or missing configuration.
    #[error("configuration error: {0}")]
    Config(String),

    /// Source code parsing failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Embedding provider or transport failure.
    #[error("embedding error: {0}")]
    Embedding(String),

    /// A vector does not have the index's configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbedDimensionMismatch { expected: usize, actual: usize },

    /// The embedder returned a different number of vectors than texts.
    #[error("embedder returned {actual} vectors for {expected} texts")]
    EmbedCountMismatch { expected: usize, actual: usize },

    /// Metadata lookup on a vector id that was never added.
    #[error("no metadata for vector id {0}")]
    NotFound(u64),

    /// Metadata insert on a vector id that is already present.
    #[error("vector id {0} already has metadata")]
    IdConflict(u64),

    /// Persisted index files are missing, corrupt, or do not belong together.
    #[error("index error: {0}")]
    IndexIo(String),

    /// JSON serialization / deserialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML deserialization failure.
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// A required file was not found.
    #[error("file not found: {}", .0.display())]
    FileNotFound(PathBuf),
}
