//! Semantic retrieval over a loaded [`CodeIndex`].

use std::path::PathBuf;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

use codeseek_core::{ChunkKind, CodeChunk, Result};
use codeseek_parser::CallGraph;
use serde::Serialize;

use crate::embedding::Embedder;
use crate::store::CodeIndex;

/// One ranked result.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryHit {
    /// Cosine similarity between the query and the chunk.
    pub score: f32,
    pub vector_id: u64,
    pub chunk: CodeChunk,
}

/// Short reference to a neighboring chunk in the call graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NeighborRef {
    pub vector_id: u64,
    pub id: String,
    pub name: String,
    pub kind: ChunkKind,
    pub file_path: PathBuf,
    pub start_line: u32,
}

impl NeighborRef {
    fn new(vector_id: u64, chunk: &CodeChunk) -> Self {
        Self {
            vector_id,
            id: chunk.id().to_string(),
            name: chunk.name().to_string(),
            kind: chunk.kind(),
            file_path: chunk.file_path().to_path_buf(),
            start_line: chunk.start_line(),
        }
    }
}

/// Call-graph neighbors of a hit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Neighbors {
    /// Chunks this chunk calls.
    pub callees: Vec<NeighborRef>,
    /// Chunks that call this chunk.
    pub callers: Vec<NeighborRef>,
}

/// A hit plus its call-graph neighborhood.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedHit {
    #[serde(flatten)]
    pub hit: QueryHit,
    pub neighbors: Neighbors,
}

/// Answers natural-language queries against a read-only index snapshot.
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use codeseek_index::embedding::HashEmbedder;
/// use codeseek_index::query::QueryService;
/// use codeseek_index::store::CodeIndex;
///
/// # async fn example() {
/// let index = CodeIndex::open(Path::new(".codeseek/index")).unwrap();
/// let service = QueryService::new(Arc::new(index), Arc::new(HashEmbedder::new(384)));
/// for hit in service.query("load configuration", 5).await.unwrap() {
///     println!("{:.3} {}", hit.score, hit.chunk.id());
/// }
/// # }
/// ```
pub struct QueryService {
    index: Arc<CodeIndex>,
    embedder: Arc<dyn Embedder>,
    graph: OnceLock<CallGraph>,
}

impl QueryService {
    pub fn new(index: Arc<CodeIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            graph: OnceLock::new(),
        }
    }

    pub fn index(&self) -> &CodeIndex {
        &self.index
    }

    /// Return the `top_k` chunks most similar to `text`, best first.
    ///
    /// Order is exactly the vector index's order: descending score, ties by
    /// ascending vector id.
    ///
    /// # Errors
    ///
    /// Returns the embedder's error,
    /// [`CodeseekError::EmbedDimensionMismatch`](codeseek_core::CodeseekError::EmbedDimensionMismatch)
    /// if the embedder does not match the index, or
    /// [`CodeseekError::NotFound`](codeseek_core::CodeseekError::NotFound) if a
    /// returned id has no metadata.
    pub async fn query(&self, text: &str, top_k: usize) -> Result<Vec<QueryHit>> {
        let embedding = self.embedder.embed_query(text).await?;
        let ranked = self.index.vectors().search(&embedding, top_k)?;

        let mut hits = Vec::with_capacity(ranked.len());
        for (score, vector_id) in ranked {
            let chunk = self.index.metadata().get(vector_id)?.clone();
            hits.push(QueryHit {
                score,
                vector_id,
                chunk,
            });
        }
        tracing::debug!(query = text, hits = hits.len(), "query answered");
        Ok(hits)
    }

    /// Like [`QueryService::query`], with each hit's callers and callees attached.
    ///
    /// Neighbors never change which hits are returned or their order.
    ///
    /// # Errors
    ///
    /// Same as [`QueryService::query`].
    pub async fn query_with_neighbors(&self, text: &str, top_k: usize) -> Result<Vec<EnrichedHit>> {
        let hits = self.query(text, top_k).await?;
        let graph = self.graph();

        let mut enriched = Vec::with_capacity(hits.len());
        for hit in hits {
            let position = hit.vector_id as usize;
            let neighbors = Neighbors {
                callees: self.neighbor_refs(&graph.callees(position))?,
                callers: self.neighbor_refs(&graph.callers(position))?,
            };
            enriched.push(EnrichedHit { hit, neighbors });
        }
        Ok(enriched)
    }

    /// Call graph over every indexed chunk; node `i` is vector id `i`.
    fn graph(&self) -> &CallGraph {
        self.graph.get_or_init(|| CallGraph::build(self.index.chunks()))
    }

    fn neighbor_refs(&self, positions: &[usize]) -> Result<Vec<NeighborRef>> {
        positions
            .iter()
            .map(|&p| {
                let vector_id = p as u64;
                let chunk = self.index.metadata().get(vector_id)?;
                Ok(NeighborRef::new(vector_id, chunk))
            })
            .collect()
    }
}

/// The index currently being served.
///
/// Readers take an `Arc` snapshot and keep using it even if a newer index
/// is swapped in meanwhile; a served index is never mutated in place.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use codeseek_index::query::ActiveIndex;
/// use codeseek_index::store::CodeIndex;
///
/// let active = ActiveIndex::new(Arc::new(CodeIndex::new(4).unwrap()));
/// let before = active.snapshot();
/// active.swap(Arc::new(CodeIndex::new(8).unwrap()));
/// assert_eq!(before.dimension(), 4);
/// assert_eq!(active.snapshot().dimension(), 8);
/// ```
#[derive(Debug)]
pub struct ActiveIndex {
    current: RwLock<Arc<CodeIndex>>,
}

impl ActiveIndex {
    pub fn new(index: Arc<CodeIndex>) -> Self {
        Self {
            current: RwLock::new(index),
        }
    }

    /// The index being served right now.
    pub fn snapshot(&self) -> Arc<CodeIndex> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Serve `index` from now on, returning the one it replaces.
    pub fn swap(&self, index: Arc<CodeIndex>) -> Arc<CodeIndex> {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *current, index)
    }
}
