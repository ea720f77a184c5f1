//! Vector id → chunk metadata.

use std::collections::BTreeMap;
use std::path::Path;

use codeseek_core::{CodeChunk, CodeseekError, Result};
use serde::{Deserialize, Serialize};

use crate::store::write_atomic;

const FORMAT_VERSION: u32 = 1;

/// Keyed store of the chunk behind each vector id.
///
/// # Examples
///
/// ```
/// use std::collections::BTreeSet;
/// use std::path::PathBuf;
/// use codeseek_core::{ChunkKind, CodeChunk, CodeseekError};
/// use codeseek_index::metadata::MetadataStore;
///
/// let mut store = MetadataStore::new();
/// let chunk = CodeChunk::new(
///     PathBuf::from("a.py"), "main", ChunkKind::Function, 1, 2, "def main(): pass", BTreeSet::new(),
/// );
/// store.add(0, chunk).unwrap();
/// assert_eq!(store.get(0).unwrap().name(), "main");
/// assert!(matches!(store.get(1), Err(CodeseekError::NotFound(1))));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataStore {
    generation: Option<String>,
    records: BTreeMap<u64, CodeChunk>,
}

#[derive(Serialize)]
struct MetadataFileRef<'a> {
    version: u32,
    generation: Option<&'a str>,
    records: &'a BTreeMap<u64, CodeChunk>,
}

#[derive(Deserialize)]
struct MetadataFile {
    version: u32,
    generation: Option<String>,
    records: BTreeMap<u64, CodeChunk>,
}

impl MetadataStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert the record for `vector_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::IdConflict`] if the id already has a record;
    /// the existing record is kept.
    pub fn add(&mut self, vector_id: u64, chunk: CodeChunk) -> Result<()> {
        if self.records.contains_key(&vector_id) {
            return Err(CodeseekError::IdConflict(vector_id));
        }
        self.records.insert(vector_id, chunk);
        Ok(())
    }

    /// Look up the record for `vector_id`.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::NotFound`] if the id was never added.
    pub fn get(&self, vector_id: u64) -> Result<&CodeChunk> {
        self.records
            .get(&vector_id)
            .ok_or(CodeseekError::NotFound(vector_id))
    }

    pub fn contains(&self, vector_id: u64) -> bool {
        self.records.contains_key(&vector_id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Records in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = (u64, &CodeChunk)> {
        self.records.iter().map(|(id, chunk)| (*id, chunk))
    }

    /// Fingerprint of the vector blob these records belong to, if saved.
    pub fn generation(&self) -> Option<&str> {
        self.generation.as_deref()
    }

    pub fn set_generation(&mut self, generation: Option<String>) {
        self.generation = generation;
    }

    /// Write the store as JSON to `path` atomically.
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::Serialization`] or [`CodeseekError::Io`].
    pub fn save(&self, path: &Path) -> Result<()> {
        let file = MetadataFileRef {
            version: FORMAT_VERSION,
            generation: self.generation(),
            records: &self.records,
        };
        let json = serde_json::to_vec_pretty(&file)?;
        write_atomic(path, &json)
    }

    /// Read a store written by [`MetadataStore::save`].
    ///
    /// # Errors
    ///
    /// Returns [`CodeseekError::IndexIo`] if the file is missing, unparseable,
    /// or of an unknown format version.
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            CodeseekError::IndexIo(format!("failed to read {}: {e}", path.display()))
        })?;
        let file: MetadataFile = serde_json::from_slice(&bytes).map_err(|e| {
            CodeseekError::IndexIo(format!("{} is not a metadata file: {e}", path.display()))
        })?;
        if file.version != FORMAT_VERSION {
            return Err(CodeseekError::IndexIo(format!(
                "{}: unsupported metadata version {}",
                path.display(),
                file.version
            )));
        }
        Ok(Self {
            generation: file.generation,
            records: file.records,
        })
    }
}
