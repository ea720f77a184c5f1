use std::collections::BTreeSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Structural category of a [`CodeChunk`].
///
/// # Examples
///
/// ```
/// use codeseek_core::ChunkKind;
///
/// assert_eq!(ChunkKind::Method.to_string(), "method");
/// assert_eq!("class".parse::<ChunkKind>().unwrap(), ChunkKind::Class);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChunkKind {
    /// A function defined at module level.
    Function,
    /// A class definition, spanning its whole body.
    Class,
    /// A function defined directly in a class body.
    Method,
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChunkKind::Function => write!(f, "function"),
            ChunkKind::Class => write!(f, "class"),
            ChunkKind::Method => write!(f, "method"),
        }
    }
}

impl FromStr for ChunkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "function" => Ok(ChunkKind::Function),
            "class" => Ok(ChunkKind::Class),
            "method" => Ok(ChunkKind::Method),
            other => Err(format!("unknown chunk kind: {other}")),
        }
    }
}

/// A structurally meaningful unit of source code: one function, class, or method.
///
/// Chunks are built once by the parser and never mutated afterwards, so the
/// fields are only readable through accessors. The id is derived from the
/// file name, symbol name and start line.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use std::path::PathBuf;
/// use codeseek_core::{ChunkKind, CodeChunk};
///
/// let chunk = CodeChunk::new(
///     PathBuf::from("app/service.py"),
///     "foo",
///     ChunkKind::Function,
///     3,
///     4,
///     "def foo():\n    bar()",
///     BTreeSet::from(["bar".to_string()]),
/// );
/// assert_eq!(chunk.id(), "service.py:foo:3");
/// assert!(chunk.calls().contains("bar"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeChunk {
    id: String,
    file_path: PathBuf,
    name: String,
    kind: ChunkKind,
    start_line: u32,
    end_line: u32,
    source_text: String,
    calls: BTreeSet<String>,
}

impl CodeChunk {
    /// Build a chunk, deriving its id as `basename(file):name:start_line`.
    ///
    /// `end_line` is clamped up to `start_line` so the span is never inverted.
    pub fn new(
        file_path: PathBuf,
        name: impl Into<String>,
        kind: ChunkKind,
        start_line: u32,
        end_line: u32,
        source_text: impl Into<String>,
        calls: BTreeSet<String>,
    ) -> Self {
        let name = name.into();
        let id = chunk_id(&file_path, &name, start_line);
        Self {
            id,
            file_path,
            name,
            kind,
            start_line,
            end_line: end_line.max(start_line),
            source_text: source_text.into(),
            calls,
        }
    }

    /// Deterministic identifier, unique within one parse run.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Path of the file the chunk was parsed from.
    pub fn file_path(&self) -> &Path {
        &self.file_path
    }

    /// Symbol name (function, class or method name).
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ChunkKind {
        self.kind
    }

    /// First line of the span (1-indexed).
    pub fn start_line(&self) -> u32 {
        self.start_line
    }

    /// Last line of the span (1-indexed, inclusive).
    pub fn end_line(&self) -> u32 {
        self.end_line
    }

    /// Verbatim source lines covered by the chunk.
    pub fn source_text(&self) -> &str {
        &self.source_text
    }

    /// Names referenced by call expressions inside the chunk.
    ///
    /// Set semantics only; the iteration order carries no meaning.
    pub fn calls(&self) -> &BTreeSet<String> {
        &self.calls
    }

    /// Whether this chunk's line span contains `other`'s span.
    pub fn contains_span(&self, other: &CodeChunk) -> bool {
        self.file_path == other.file_path
            && self.start_line <= other.start_line
            && other.end_line <= self.end_line
    }
}

fn chunk_id(file_path: &Path, name: &str, start_line: u32) -> String {
    let base = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_path.to_string_lossy().into_owned());
    format!("{base}:{name}:{start_line}")
}

/// Output format for CLI subcommands.
///
/// Implements [`FromStr`] so it can be used directly with `clap` argument parsing.
///
/// # Examples
///
/// ```
/// use codeseek_core::OutputFormat;
///
/// let fmt: OutputFormat = "json".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Json);
///
/// let fmt: OutputFormat = "md".parse().unwrap();
/// assert_eq!(fmt, OutputFormat::Markdown);
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summaries.
    #[default]
    Text,
    /// Machine-readable JSON with camelCase keys.
    Json,
    /// Markdown-formatted output.
    Markdown,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Text => write!(f, "text"),
            OutputFormat::Json => write!(f, "json"),
            OutputFormat::Markdown => write!(f, "markdown"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            "markdown" | "md" => Ok(OutputFormat::Markdown),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}
