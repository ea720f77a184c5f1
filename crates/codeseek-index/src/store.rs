//! Id-aligned vector + metadata storage and its on-disk generations.
//!
//! An index directory looks like:
//!
//! ```text
//! <dir>/CURRENT                      name of the active generation
//! <dir>/generations/<gen>/vectors.bin
//! <dir>/generations/<gen>/metadata.json
//! ```
//!
//! A generation is written completely before `CURRENT` is swapped to it, so
//! a crash mid-save leaves the previous generation in place.

use std::collections::HashSet;
use std::io::Write;
use std::ops::Range;
use std::path::{Path, PathBuf};

use codeseek_core::{ChunkKind, CodeChunk, CodeseekError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::metadata::MetadataStore;
use crate::vector::VectorIndex;

const CURRENT_FILE: &str = "CURRENT";
const GENERATIONS_DIR: &str = "generations";
const VECTORS_FILE: &str = "vectors.bin";
const METADATA_FILE: &str = "metadata.json";
const GENERATION_NAME_LEN: usize = 16;

/// Index statistics.
///
/// # Examples
///
/// ```
/// use codeseek_index::store::CodeIndex;
///
/// let index = CodeIndex::new(8).unwrap();
/// let stats = index.stats();
/// assert_eq!(stats.total_chunks, 0);
/// assert_eq!(stats.dimension, 8);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Total number of chunks (and vectors) in the index.
    pub total_chunks: usize,
    /// Number of distinct source files the chunks came from.
    pub total_files: usize,
    pub functions: usize,
    pub classes: usize,
    pub methods: usize,
    /// Vector dimension.
    pub dimension: usize,
    /// Fingerprint of the saved generation, if the index has been saved or loaded.
    pub generation: Option<String>,
}

/// Vector index and metadata store kept in lockstep.
///
/// `CodeIndex` is the only way to mutate the pair, and
/// [`CodeIndex::commit_batch`] is the only mutation: vector id `i` always
/// has metadata record `i`.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use std::path::PathBuf;
/// use codeseek_core::{ChunkKind, CodeChunk};
/// use codeseek_index::store::CodeIndex;
///
/// let mut index = CodeIndex::new(2).unwrap();
/// let chunk = CodeChunk::new(
///     PathBuf::from("a.py"), "main", ChunkKind::Function, 1, 2, "def main(): pass", BTreeSet::new(),
/// );
/// let ids = index.commit_batch(vec![chunk], vec![vec![1.0, 0.0]]).unwrap();
/// assert_eq!(ids, 0..1);
/// assert_eq!(index.metadata().get(0).unwrap().name(), "main");
/// ```
#[derive(Debug, Clone)]
pub struct CodeIndex {
    vectors: VectorIndex,
    metadata: MetadataStore,
}

impl CodeIndex {
    /// Create an empty index for vectors of length `dimension`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Config`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        Ok(Self {
            vectors: VectorIndex::new(dimension)?,
            metadata: MetadataStore::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.vectors.dimension()
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    pub fn vectors(&self) -> &VectorIndex {
        &self.vectors
    }

    pub fn metadata(&self) -> &MetadataStore {
        &self.metadata
    }

    /// Chunks in vector-id order.
    pub fn chunks(&self) -> impl Iterator<Item = &CodeChunk> {
        self.metadata.iter().map(|(_, chunk)| chunk)
    }

    /// Add `chunks[i]` with `vectors[i]` for every `i`, all or nothing.
    ///
    /// Every check runs before anything is mutated, so on error the index
    /// is exactly as it was. Returns the vector ids assigned to the batch.
    ///
    /// # Errors
    ///
    /// - [`CodeseekError::EmbedCountMismatch`] if the lengths differ
    /// - [`CodeseekError::EmbedDimensionMismatch`] if a vector has the wrong length
    /// - [`CodeseekError::IdConflict`] if an id to be assigned already has metadata
    pub fn commit_batch(
        &mut self,
        chunks: Vec<CodeChunk>,
        vectors: Vec<Vec<f32>>,
    ) -> Result<Range<u64>> {
        if chunks.len() != vectors.len() {
            return Err(CodeseekError::EmbedCountMismatch {
                expected: chunks.len(),
                actual: vectors.len(),
            });
        }
        self.vectors.check_dimensions(&vectors)?;

        let start = self.vectors.len() as u64;
        let end = start + chunks.len() as u64;
        if let Some(taken) = (start..end).find(|id| self.metadata.contains(*id)) {
            return Err(CodeseekError::IdConflict(taken));
        }

        let ids = self.vectors.add(&vectors)?;
        for (id, chunk) in ids.clone().zip(chunks) {
            self.metadata.add(id, chunk)?;
        }
        // Content changed; the old generation no longer describes it.
        self.metadata.set_generation(None);
        Ok(ids)
    }

    /// Write the index as a new generation under `dir` and make it current.
    ///
    /// Returns the generation's full fingerprint. Older generations are
    /// removed afterwards; failures there are logged and ignored. If a write
    /// fails, the in-memory generation is left as it was.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Io`] or [`CodeseekError::Serialization`] if
    /// the generation or `CURRENT` cannot be written.
    pub fn save(&mut self, dir: &Path) -> Result<String> {
        let fingerprint = self.content_fingerprint()?;
        let name = &fingerprint[..GENERATION_NAME_LEN];

        let previous = self.metadata.generation().map(String::from);
        self.metadata.set_generation(Some(fingerprint.clone()));
        if let Err(e) = self.write_generation(dir, name) {
            self.metadata.set_generation(previous);
            return Err(e);
        }

        tracing::info!(
            dir = %dir.display(),
            generation = name,
            chunks = self.len(),
            "saved index generation"
        );
        remove_stale_generations(dir, name);
        Ok(fingerprint)
    }

    fn write_generation(&self, dir: &Path, name: &str) -> Result<()> {
        let gen_dir = generation_dir(dir, name);
        std::fs::create_dir_all(&gen_dir)?;
        self.vectors.save(&gen_dir.join(VECTORS_FILE))?;
        self.metadata.save(&gen_dir.join(METADATA_FILE))?;
        write_atomic(&dir.join(CURRENT_FILE), format!("{name}\n").as_bytes())
    }

    /// SHA-256 (hex) over the vector fingerprint and every metadata record,
    /// so a generation names one exact vectors + records pair.
    fn content_fingerprint(&self) -> Result<String> {
        let mut hasher = Sha256::new();
        hasher.update(self.vectors.fingerprint().as_bytes());
        for (id, chunk) in self.metadata.iter() {
            hasher.update(id.to_le_bytes());
            hasher.update(serde_json::to_vec(chunk)?);
        }
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Load the current generation from `dir`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::IndexIo`] if there is no saved index, if a
    /// file is corrupt, or if the vectors and metadata do not belong together.
    pub fn open(dir: &Path) -> Result<Self> {
        let current_path = dir.join(CURRENT_FILE);
        let current = match std::fs::read_to_string(&current_path) {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CodeseekError::IndexIo(format!(
                    "no index found in {}; run `codeseek index`",
                    dir.display()
                )));
            }
            Err(e) => {
                return Err(CodeseekError::IndexIo(format!(
                    "failed to read {}: {e}",
                    current_path.display()
                )));
            }
        };

        let name = current.trim();
        if name.len() != GENERATION_NAME_LEN || !name.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(CodeseekError::IndexIo(format!(
                "{} does not name a generation",
                current_path.display()
            )));
        }

        let gen_dir = generation_dir(dir, name);
        let vectors = VectorIndex::load(&gen_dir.join(VECTORS_FILE))?;
        let metadata = MetadataStore::load(&gen_dir.join(METADATA_FILE))?;

        if metadata.len() != vectors.len() {
            return Err(CodeseekError::IndexIo(format!(
                "generation {name}: {} metadata records for {} vectors",
                metadata.len(),
                vectors.len()
            )));
        }
        for (expected, (id, _)) in metadata.iter().enumerate() {
            if id != expected as u64 {
                return Err(CodeseekError::IndexIo(format!(
                    "generation {name}: unexpected metadata id {id}"
                )));
            }
        }

        let index = Self { vectors, metadata };
        let fingerprint = index.content_fingerprint()?;
        if !fingerprint.starts_with(name)
            || index.metadata.generation() != Some(fingerprint.as_str())
        {
            return Err(CodeseekError::IndexIo(format!(
                "generation {name}: metadata does not belong to these vectors"
            )));
        }

        tracing::debug!(dir = %dir.display(), generation = name, chunks = index.len(), "opened index");
        Ok(index)
    }

    /// Get index statistics.
    pub fn stats(&self) -> IndexStats {
        let mut files = HashSet::new();
        let (mut functions, mut classes, mut methods) = (0, 0, 0);
        for chunk in self.chunks() {
            files.insert(chunk.file_path());
            match chunk.kind() {
                ChunkKind::Function => functions += 1,
                ChunkKind::Class => classes += 1,
                ChunkKind::Method => methods += 1,
            }
        }

        IndexStats {
            total_chunks: self.len(),
            total_files: files.len(),
            functions,
            classes,
            methods,
            dimension: self.dimension(),
            generation: self.metadata.generation().map(String::from),
        }
    }
}

fn generation_dir(dir: &Path, name: &str) -> PathBuf {
    dir.join(GENERATIONS_DIR).join(name)
}

fn remove_stale_generations(dir: &Path, keep: &str) {
    let Ok(entries) = std::fs::read_dir(dir.join(GENERATIONS_DIR)) else {
        return;
    };
    for entry in entries.flatten() {
        if entry.file_name() == keep {
            continue;
        }
        if let Err(e) = std::fs::remove_dir_all(entry.path()) {
            tracing::warn!(path = %entry.path().display(), "failed to remove stale generation: {e}");
        }
    }
}

/// Write `bytes` to `path` through a temp file in the same directory.
///
/// The temp file is synced and then renamed over `path`, so readers see
/// either the old content or the new, never a partial write. If anything
/// fails the temp file is removed when it drops.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir)?;

    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| CodeseekError::Io(e.error))?;
    Ok(())
}
