//! Parse → embed → commit, one batch of files at a time.

use std::ops::Range;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use codeseek_core::{CodeseekError, Result, ScanConfig};
use codeseek_parser::{parse_repository, scan_repository};
use serde::{Deserialize, Serialize};

use crate::embedding::Embedder;
use crate::store::CodeIndex;

/// Outcome of one committed batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// Number of files handed to the parser.
    pub files: usize,
    /// Number of chunks committed.
    pub chunks: usize,
    /// Vector ids assigned to the batch's chunks.
    pub ids: Range<u64>,
}

/// A batch that was discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedBatch {
    /// Zero-based batch number within the run.
    pub batch: usize,
    pub files: Vec<PathBuf>,
    pub error: String,
}

/// Summary of a whole-repository indexing run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexReport {
    pub files_scanned: usize,
    pub chunks_indexed: usize,
    pub batches_committed: usize,
    pub failed_batches: Vec<FailedBatch>,
    pub duration_ms: u64,
}

/// Drives chunks from source files into a [`CodeIndex`].
///
/// # Examples
///
/// ```no_run
/// use std::path::Path;
/// use std::sync::Arc;
/// use codeseek_core::ScanConfig;
/// use codeseek_index::embedding::HashEmbedder;
/// use codeseek_index::pipeline::IndexingPipeline;
/// use codeseek_index::store::CodeIndex;
///
/// # async fn example() {
/// let pipeline = IndexingPipeline::new(Arc::new(HashEmbedder::new(384)), 64, 256);
/// let mut index = CodeIndex::new(384).unwrap();
/// let report = pipeline
///     .index_repository(&mut index, Path::new("."), &ScanConfig::default())
///     .await
///     .unwrap();
/// println!("indexed {} chunks", report.chunks_indexed);
/// # }
/// ```
pub struct IndexingPipeline {
    embedder: Arc<dyn Embedder>,
    batch_size: usize,
    files_per_batch: usize,
}

impl IndexingPipeline {
    /// `batch_size` is texts per embedder call, `files_per_batch` is files
    /// per committed batch. Both are clamped to at least 1.
    pub fn new(embedder: Arc<dyn Embedder>, batch_size: usize, files_per_batch: usize) -> Self {
        Self {
            embedder,
            batch_size: batch_size.max(1),
            files_per_batch: files_per_batch.max(1),
        }
    }

    /// Parse, embed and commit `paths` as one batch.
    ///
    /// Unreadable or unparseable files contribute no chunks. Either every
    /// chunk of the batch is committed or none is.
    ///
    /// # Errors
    ///
    /// Returns the embedder's error, [`CodeseekError::EmbedCountMismatch`] or
    /// [`CodeseekError::EmbedDimensionMismatch`]; the index is unchanged.
    pub async fn index_files<P: AsRef<Path>>(
        &self,
        index: &mut CodeIndex,
        paths: &[P],
    ) -> Result<BatchReport> {
        let chunks = parse_repository(paths);
        let texts: Vec<String> = chunks.iter().map(|c| c.source_text().to_string()).collect();
        let vectors = self.embed_all(&texts, index.dimension()).await?;

        let count = chunks.len();
        let ids = index.commit_batch(chunks, vectors)?;
        tracing::debug!(files = paths.len(), chunks = count, ?ids, "committed batch");
        Ok(BatchReport {
            files: paths.len(),
            chunks: count,
            ids,
        })
    }

    /// Scan `root` and index it in batches of `files_per_batch` files.
    ///
    /// A failing batch is logged and recorded in
    /// [`IndexReport::failed_batches`]; the run carries on with the next one.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Config`] if `root` is not a directory.
    pub async fn index_repository(
        &self,
        index: &mut CodeIndex,
        root: &Path,
        scan: &ScanConfig,
    ) -> Result<IndexReport> {
        let start = std::time::Instant::now();
        let files = scan_repository(root, scan)?;
        let mut report = IndexReport {
            files_scanned: files.len(),
            ..IndexReport::default()
        };

        let total = files.len().div_ceil(self.files_per_batch);
        tracing::info!(files = files.len(), batches = total, "indexing started");

        for (i, batch) in files.chunks(self.files_per_batch).enumerate() {
            match self.index_files(index, batch).await {
                Ok(batch_report) => {
                    report.batches_committed += 1;
                    report.chunks_indexed += batch_report.chunks;
                    tracing::info!(
                        progress = format_args!("{}/{total}", i + 1),
                        chunks = batch_report.chunks,
                        "batch committed"
                    );
                }
                Err(e) => {
                    tracing::error!(batch = i, files = batch.len(), "batch failed: {e}");
                    report.failed_batches.push(FailedBatch {
                        batch: i,
                        files: batch.to_vec(),
                        error: e.to_string(),
                    });
                }
            }
        }

        report.duration_ms = start.elapsed().as_millis().try_into().unwrap_or(u64::MAX);
        tracing::info!(
            chunks = report.chunks_indexed,
            failed = report.failed_batches.len(),
            duration_ms = report.duration_ms,
            "indexing finished"
        );
        Ok(report)
    }

    /// Embed `texts` in sub-batches, checking the embedder's contract.
    async fn embed_all(&self, texts: &[String], dimension: usize) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let embedded = self.embedder.embed_batch(batch).await?;
            if embedded.len() != batch.len() {
                return Err(CodeseekError::EmbedCountMismatch {
                    expected: batch.len(),
                    actual: embedded.len(),
                });
            }
            if let Some(bad) = embedded.iter().find(|v| v.len() != dimension) {
                return Err(CodeseekError::EmbedDimensionMismatch {
                    expected: dimension,
                    actual: bad.len(),
                });
            }
            vectors.extend(embedded);
        }
        Ok(vectors)
    }
}
