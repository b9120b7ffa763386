//! IDIndexManager (C6): the simplest of the three auxiliary indexes — a
//! sorted, deduplicated list of every PointID in the collection, used for
//! existence checks and set-based reconciliation. Persisted with
//! `serde_json` rather than a bincode-style binary, consistent with the
//! other two managers: small and human-debuggable.

use std::path::Path;

use crate::error::EngineError;
use crate::error::Result;
use crate::index::IndexKind;
use crate::index::rebuild;
use crate::index::scan_records;
use crate::types::PointId;

pub struct IdIndexManager {
    ids: Vec<PointId>,
}

impl IdIndexManager {
    pub fn index_exists(indexes_dir: &Path) -> bool {
        IndexKind::Id.final_path(indexes_dir).is_file()
    }

    pub fn rebuild_from_vectors(collection_dir: &Path) -> Result<()> {
        let records = scan_records(collection_dir)?;
        let indexes_dir = collection_dir.join("indexes");

        rebuild::rebuild_with_lock(&indexes_dir, IndexKind::Id, move || {
            let mut ids: Vec<PointId> = records.into_iter().map(|r| r.id).collect();
            ids.sort();
            ids.dedup();
            serde_json::to_vec(&ids).map_err(EngineError::from)
        })?;
        Ok(())
    }

    pub fn load_index(indexes_dir: &Path) -> Result<Self> {
        let path = IndexKind::Id.final_path(indexes_dir);
        let bytes = std::fs::read(&path).map_err(|e| EngineError::storage_io(&path, e))?;
        let ids: Vec<PointId> = serde_json::from_slice(&bytes).map_err(|e| EngineError::IndexCorrupt {
            index: "id_index.bin".to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { ids })
    }

    pub fn contains(&self, id: &PointId) -> bool {
        self.ids.binary_search(id).is_ok()
    }

    pub fn all_ids(&self) -> &[PointId] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkRecord;
    use crate::types::ContentType;
    use crate::types::Language;
    use crate::types::Payload;
    use tempfile::TempDir;

    fn write_record(collection_dir: &Path, id: &str) {
        let record = ChunkRecord {
            id: PointId(id.to_string()),
            vector: vec![1.0],
            payload: Payload {
                project_id: "p".to_string(),
                file_path: "a.rs".to_string(),
                file_hash: "h".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                line_start: 1,
                line_end: 1,
                file_extension: "rs".to_string(),
                file_last_modified: Some(1.0),
                indexed_timestamp: 2.0,
                kind: ContentType::Content,
                language: Language::Rust,
                git_commit_hash: None,
                git_branch: None,
                git_hash: None,
                hidden_branches: Default::default(),
                extra: Default::default(),
            },
        };
        let (aa, bb) = record.id.shard();
        let dir = collection_dir.join("vectors").join(aa).join(bb);
        std::fs::create_dir_all(&dir).unwrap();
        crate::storage::atomic::write_json_atomic(&dir.join(format!("{id}.json")), &record).unwrap();
    }

    #[test]
    fn rebuild_then_load_contains_every_point() {
        let dir = TempDir::new().unwrap();
        write_record(dir.path(), "aaaa1111");
        write_record(dir.path(), "bbbb2222");

        IdIndexManager::rebuild_from_vectors(dir.path()).unwrap();
        let manager = IdIndexManager::load_index(&dir.path().join("indexes")).unwrap();

        assert_eq!(manager.len(), 2);
        assert!(manager.contains(&PointId("aaaa1111".to_string())));
        assert!(!manager.contains(&PointId("zzzz9999".to_string())));
    }
}
