//! IndexManagers (C6) and BackgroundIndexRebuilder (C7): the three
//! auxiliary indexes built from the chunk store, and the shared
//! lock → build-into-temp → fsync → rename → release rebuild protocol that
//! keeps swaps atomic and fast.

pub mod fts;
pub mod hnsw;
pub mod id;
pub mod rebuild;

pub use fts::FtsIndexManager;
pub use hnsw::HnswIndexManager;
pub use id::IdIndexManager;
pub use rebuild::IndexKind;

use std::path::Path;
use std::path::PathBuf;

use crate::error::EngineError;
use crate::error::Result;
use crate::types::ChunkRecord;

/// Every auxiliary index manager rebuilds from the same source: the
/// ChunkRecords currently visible under `<collection_dir>/vectors/`. This is
/// deliberately independent of `FilesystemVectorStore` (which itself depends
/// on `HnswIndexManager` for its `search` fallback) to avoid a module cycle;
/// it duplicates the shard-walk `FilesystemVectorStore::scan_all` performs,
/// over the same on-disk layout.
pub(crate) fn scan_records(collection_dir: &Path) -> Result<Vec<ChunkRecord>> {
    let vectors_dir = collection_dir.join("vectors");
    if !vectors_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut records = Vec::new();
    for aa in read_subdirs(&vectors_dir)? {
        for bb in read_subdirs(&aa)? {
            for entry in std::fs::read_dir(&bb).map_err(|e| EngineError::storage_io(&bb, e))? {
                let entry = entry.map_err(|e| EngineError::storage_io(&bb, e))?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some("json") {
                    if let Ok(record) = crate::storage::atomic::read_json::<ChunkRecord>(&path) {
                        records.push(record);
                    }
                }
            }
        }
    }
    Ok(records)
}

fn read_subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| EngineError::storage_io(dir, e))? {
        let entry = entry.map_err(|e| EngineError::storage_io(dir, e))?;
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            subdirs.push(entry.path());
        }
    }
    Ok(subdirs)
}
