//! Core types, configuration, and error handling for codeseek.
//!
//! This crate provides the shared foundation used by the other crates:
//! - [`CodeseekError`]: unified error type using `thiserror`
//! - [`CodeseekConfig`]: configuration loaded from `.codeseek.toml`
//! - Shared types: [`CodeChunk`], [`ChunkKind`], [`OutputFormat`]

mod config;
mod error;
mod types;

pub use config::{CodeseekConfig, EmbeddingConfig, IndexConfig, ScanConfig, SearchConfig};
pub use error::CodeseekError;
pub use types::{ChunkKind, CodeChunk, OutputFormat};

/// A convenience `Result` type for codeseek operations.
pub type Result<T> = std::result::Result<T, CodeseekError>;
