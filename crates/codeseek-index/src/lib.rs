//! Embedding, vector storage and retrieval for codeseek.
//!
//! Chunks from `codeseek-parser` are embedded through an [`embedding::Embedder`],
//! committed into an id-aligned [`store::CodeIndex`] by the
//! [`pipeline::IndexingPipeline`], and searched by the [`query::QueryService`].

pub mod embedding;
pub mod metadata;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod vector;

pub use embedding::{build_embedder, Embedder, HashEmbedder, HttpEmbedder};
pub use metadata::MetadataStore;
pub use pipeline::{BatchReport, FailedBatch, IndexReport, IndexingPipeline};
pub use query::{ActiveIndex, EnrichedHit, NeighborRef, Neighbors, QueryHit, QueryService};
pub use store::{CodeIndex, IndexStats};
pub use vector::VectorIndex;
