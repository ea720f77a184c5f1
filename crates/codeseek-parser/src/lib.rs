//! Structural parsing of Python sources into code chunks.
//!
//! Uses tree-sitter for the syntax tree, the `ignore` crate for repository
//! walking, and petgraph for the chunk call graph.

pub mod graph;
pub mod parser;
pub mod walker;

pub use graph::{CallGraph, CallRegistry, Resolution};
pub use parser::{parse_file, parse_repository, parse_source, SyntaxKind};
pub use walker::scan_repository;
