//! Brute-force cosine similarity index over L2-normalized vectors.

use std::ops::Range;
use std::path::Path;

use codeseek_core::{CodeseekError, Result};
use sha2::{Digest, Sha256};

use crate::store::write_atomic;

const MAGIC: &[u8; 4] = b"CSVI";
const FORMAT_VERSION: u32 = 1;
const HEADER_LEN: usize = 4 + 4 + 4 + 8;

/// Fixed-dimension vector store with exact nearest-neighbor search.
///
/// Vectors are normalized on insert, so a dot product is cosine similarity.
/// Ids are positions: the n-th vector ever added has id n.
///
/// # Examples
///
/// ```
/// use codeseek_index::vector::VectorIndex;
///
/// let mut index = VectorIndex::new(3).unwrap();
/// let ids = index.add(&[vec![1.0, 0.0, 0.0], vec![0.0, 2.0, 0.0]]).unwrap();
/// assert_eq!(ids, 0..2);
///
/// let hits = index.search(&[0.0, 1.0, 0.0], 1).unwrap();
/// assert_eq!(hits[0].1, 1);
/// assert!((hits[0].0 - 1.0).abs() < 1e-6);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct VectorIndex {
    dimension: usize,
    data: Vec<f32>,
}

impl VectorIndex {
    /// Create an empty index for vectors of length `dimension`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Config`] if `dimension` is zero.
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(CodeseekError::Config(
                "vector index dimension must be at least 1".into(),
            ));
        }
        Ok(Self {
            dimension,
            data: Vec::new(),
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.data.len() / self.dimension
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The stored (normalized) vector with this id.
    pub fn get(&self, id: u64) -> Option<&[f32]> {
        let start = usize::try_from(id).ok()?.checked_mul(self.dimension)?;
        self.data.get(start..start + self.dimension)
    }

    /// Check that every vector has the index's dimension and only finite
    /// components.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::EmbedDimensionMismatch`] for the first vector
    /// of the wrong length, or [`CodeseekError::Embedding`] for the first one
    /// holding a NaN or infinity.
    pub fn check_dimensions(&self, vectors: &[Vec<f32>]) -> Result<()> {
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(CodeseekError::EmbedDimensionMismatch {
                expected: self.dimension,
                actual: bad.len(),
            });
        }
        vectors.iter().try_for_each(|v| check_finite(v))
    }

    /// Append vectors in order and return the ids they were given.
    ///
    /// All vectors are validated before any is inserted, so on error the
    /// index is unchanged. A zero vector is stored as zero.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::EmbedDimensionMismatch`] if any vector has
    /// the wrong length, or [`CodeseekError::Embedding`] if any is not finite.
    pub fn add(&mut self, vectors: &[Vec<f32>]) -> Result<Range<u64>> {
        self.check_dimensions(vectors)?;

        let start = self.len() as u64;
        self.data.reserve(vectors.len() * self.dimension);
        for vector in vectors {
            self.data.extend(normalized(vector));
        }
        Ok(start..self.len() as u64)
    }

    /// Return up to `top_k` `(score, id)` pairs, best first.
    ///
    /// Scores are cosine similarities. Equal scores are ordered by ascending
    /// id, so results are deterministic.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::EmbedDimensionMismatch`] if the query has the
    /// wrong length, or [`CodeseekError::Embedding`] if it is not finite.
    pub fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(f32, u64)>> {
        if query.len() != self.dimension {
            return Err(CodeseekError::EmbedDimensionMismatch {
                expected: self.dimension,
                actual: query.len(),
            });
        }
        check_finite(query)?;
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query = normalized(query);
        let mut scored: Vec<(f32, u64)> = self
            .data
            .chunks_exact(self.dimension)
            .enumerate()
            .map(|(id, row)| (dot(&query, row), id as u64))
            .collect();

        scored.sort_by(|a, b| b.0.total_cmp(&a.0).then(a.1.cmp(&b.1)));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// SHA-256 (hex) over dimension, count and vector bytes.
    ///
    /// Two indexes with the same fingerprint hold the same vectors in the
    /// same order.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.dimension as u64).to_le_bytes());
        hasher.update((self.len() as u64).to_le_bytes());
        hasher.update(floats_to_bytes(&self.data));
        format!("{:x}", hasher.finalize())
    }

    /// Write the index to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Io`] if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        write_atomic(path, &self.to_bytes())
    }

    /// Read an index written by [`VectorIndex::save`].
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::IndexIo`] if the file is missing, truncated
    /// or not a vector index.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            CodeseekError::IndexIo(format!("failed to read {}: {e}", path.display()))
        })?;
        Self::from_bytes(&bytes)
            .map_err(|msg| CodeseekError::IndexIo(format!("{}: {msg}", path.display())))
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len() * 4);
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&(self.dimension as u32).to_le_bytes());
        bytes.extend_from_slice(&(self.len() as u64).to_le_bytes());
        bytes.extend_from_slice(&floats_to_bytes(&self.data));
        bytes
    }

    fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, String> {
        if bytes.len() < HEADER_LEN {
            return Err("file is too short for a vector index header".into());
        }
        if &bytes[0..4] != MAGIC {
            return Err("not a codeseek vector index".into());
        }
        let version = read_u32(&bytes[4..8]);
        if version != FORMAT_VERSION {
            return Err(format!("unsupported vector index version {version}"));
        }
        let dimension = read_u32(&bytes[8..12]) as usize;
        if dimension == 0 {
            return Err("vector index has dimension 0".into());
        }
        let count = read_u64(&bytes[12..20]);

        let expected = usize::try_from(count)
            .ok()
            .and_then(|c| c.checked_mul(dimension))
            .and_then(|n| n.checked_mul(4))
            .ok_or_else(|| format!("vector count {count} is too large"))?;
        let body = &bytes[HEADER_LEN..];
        if body.len() != expected {
            return Err(format!(
                "expected {expected} bytes of vector data, found {}",
                body.len()
            ));
        }

        let data = bytes_to_floats(body);
        if data.iter().any(|x| !x.is_finite()) {
            return Err("vector data contains NaN or infinity".into());
        }
        Ok(Self { dimension, data })
    }
}

fn check_finite(vector: &[f32]) -> Result<()> {
    if vector.iter().all(|x| x.is_finite()) {
        Ok(())
    } else {
        Err(CodeseekError::Embedding("non-finite value in vector".into()))
    }
}

fn normalized(vector: &[f32]) -> Vec<f32> {
    let norm: f32 = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        vector.iter().map(|x| x / norm).collect()
    } else {
        vector.to_vec()
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut arr = [0u8; 4];
    arr.copy_from_slice(bytes);
    u32::from_le_bytes(arr)
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut arr = [0u8; 8];
    arr.copy_from_slice(bytes);
    u64::from_le_bytes(arr)
}

fn floats_to_bytes(floats: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(floats.len() * 4);
    for f in floats {
        bytes.extend_from_slice(&f.to_le_bytes());
    }
    bytes
}

fn bytes_to_floats(bytes: &[u8]) -> Vec<f32> {
    let mut floats = Vec::with_capacity(bytes.len() / 4);
    for chunk in bytes.chunks_exact(4) {
        let arr: [u8; 4] = [chunk[0], chunk[1], chunk[2], chunk[3]];
        floats.push(f32::from_le_bytes(arr));
    }
    floats
}
