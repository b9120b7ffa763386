//! ProgressiveMetadata / IndexingProgressLog (C8): resumable ingestion
//! state persisted as `indexing_progress.json`, with legacy-field migration
//! and lock-protected branch tracking.
//!
//! Every update is read-modify-write under an exclusive advisory lock on a
//! sibling `.lock` file (matching the "exclusive advisory lock per update"
//! policy in the concurrency model), so the persisted file is always the
//! source of truth rather than an in-memory cache that can drift from it
//! across processes.

use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use chrono::DateTime;
use chrono::Utc;
use fs2::FileExt;
use serde::Deserialize;
use serde::Deserializer;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::types::PointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileIndexingStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Full,
    Incremental,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexingSession {
    pub session_id: String,
    pub operation_type: OperationType,
    pub started_at: DateTime<Utc>,
    pub embedding_provider: String,
    pub embedding_model: String,
    pub total_files: usize,
}

/// One file's indexing outcome. The legacy field name `qdrant_point_ids`
/// must migrate transparently to `vector_point_ids` on load — handled in
/// `Deserialize` below rather than via `#[serde(alias = ...)]`, since the
/// migration also has to coalesce a `null` legacy value (not just an
/// absent one) to an empty list, which `alias` alone cannot express.
#[derive(Debug, Clone, Serialize)]
pub struct FileIndexingRecord {
    pub file_path: String,
    pub status: FileIndexingStatus,
    #[serde(default)]
    pub chunks_created: usize,
    pub vector_point_ids: Vec<PointId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<'de> Deserialize<'de> for FileIndexingRecord {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Raw {
            file_path: String,
            status: FileIndexingStatus,
            #[serde(default)]
            chunks_created: usize,
            #[serde(default)]
            vector_point_ids: Option<Vec<PointId>>,
            #[serde(default)]
            qdrant_point_ids: Option<Vec<PointId>>,
            #[serde(default)]
            error: Option<String>,
        }
        let raw = Raw::deserialize(deserializer)?;
        Ok(FileIndexingRecord {
            file_path: raw.file_path,
            status: raw.status,
            chunks_created: raw.chunks_created,
            vector_point_ids: raw.vector_point_ids.or(raw.qdrant_point_ids).unwrap_or_default(),
            error: raw.error,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProgressiveMetadata {
    #[serde(default)]
    pub current_session: Option<IndexingSession>,
    #[serde(default)]
    pub file_records: std::collections::HashMap<String, FileIndexingRecord>,
    #[serde(default)]
    pub current_branch: Option<String>,
    #[serde(default = "Utc::now")]
    pub last_updated: DateTime<Utc>,
}

pub struct IndexingProgressLog {
    path: PathBuf,
}

const LOCK_DEADLINE: Duration = Duration::from_secs(5);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(5);

impl IndexingProgressLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    fn lock_path(&self) -> PathBuf {
        let mut path = self.path.clone();
        path.set_extension("json.lock");
        path
    }

    /// Loads the persisted state. A corrupted file is deleted (not backed
    /// up) and a single warning emitted; the in-memory state returned is
    /// empty, and the next `save` recreates the file from scratch.
    pub fn load(&self) -> ProgressiveMetadata {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(_) => return ProgressiveMetadata::default(),
        };
        match serde_json::from_slice(&bytes) {
            Ok(metadata) => metadata,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "indexing progress file is corrupt; discarding");
                let _ = std::fs::remove_file(&self.path);
                ProgressiveMetadata::default()
            }
        }
    }

    fn save_locked(&self, metadata: &ProgressiveMetadata) -> Result<()> {
        crate::storage::atomic::write_json_atomic(&self.path, metadata)
    }

    fn with_lock<T>(&self, f: impl FnOnce(&mut ProgressiveMetadata) -> Result<T>) -> Result<T> {
        let lock_path = self.lock_path();
        if let Some(parent) = lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| EngineError::storage_io(parent, e))?;
        }
        let lock_file = std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .open(&lock_path)
            .map_err(|e| EngineError::storage_io(&lock_path, e))?;
        acquire_exclusive(&lock_file, &lock_path)?;

        let result = (|| {
            let mut metadata = self.load();
            let value = f(&mut metadata)?;
            metadata.last_updated = Utc::now();
            self.save_locked(&metadata)?;
            Ok(value)
        })();

        let _ = FileExt::unlock(&lock_file);
        result
    }

    pub fn start_indexing(
        &self,
        operation_type: OperationType,
        embedding_provider: &str,
        embedding_model: &str,
        total_files: usize,
        current_branch: Option<&str>,
    ) -> Result<IndexingSession> {
        let session = IndexingSession {
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            operation_type,
            started_at: Utc::now(),
            embedding_provider: embedding_provider.to_string(),
            embedding_model: embedding_model.to_string(),
            total_files,
        };
        let session_clone = session.clone();
        self.with_lock(move |metadata| {
            metadata.current_session = Some(session_clone.clone());
            if let Some(branch) = current_branch {
                metadata.current_branch = Some(branch.to_string());
            }
            Ok(())
        })?;
        Ok(session)
    }

    pub fn update_current_branch(&self, name: &str) -> Result<()> {
        let name = name.to_string();
        self.with_lock(move |metadata| {
            metadata.current_branch = Some(name.clone());
            Ok(())
        })
    }

    /// Returns the current branch, retrying once on a transient lock
    /// conflict before falling back. Corruption (handled transparently by
    /// `load`) also falls back to `fallback`.
    pub fn get_current_branch_with_retry(&self, fallback: &str) -> String {
        for attempt in 0..2 {
            match self.load().current_branch {
                Some(branch) => return branch,
                None if attempt == 0 => std::thread::sleep(Duration::from_millis(10)),
                None => break,
            }
        }
        fallback.to_string()
    }

    pub fn record_file_result(
        &self,
        file_path: &str,
        status: FileIndexingStatus,
        chunks_created: usize,
        vector_point_ids: Vec<PointId>,
        error: Option<String>,
    ) -> Result<()> {
        let file_path = file_path.to_string();
        self.with_lock(move |metadata| {
            metadata.file_records.insert(
                file_path.clone(),
                FileIndexingRecord {
                    file_path,
                    status,
                    chunks_created,
                    vector_point_ids,
                    error,
                },
            );
            Ok(())
        })
    }

    pub fn get_record(&self, file_path: &str) -> Option<FileIndexingRecord> {
        self.load().file_records.get(file_path).cloned()
    }
}

fn acquire_exclusive(lock_file: &std::fs::File, lock_path: &Path) -> Result<()> {
    let start = Instant::now();
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if start.elapsed() < LOCK_DEADLINE => std::thread::sleep(LOCK_POLL_INTERVAL),
            Err(_) => {
                return Err(EngineError::LockUnavailable {
                    lock: lock_path.display().to_string(),
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn legacy_qdrant_point_ids_migrates_to_vector_point_ids() {
        let json = r#"{"file_path":"a.rs","status":"completed","chunks_created":2,"qdrant_point_ids":["id1","id2"]}"#;
        let record: FileIndexingRecord = serde_json::from_str(json).unwrap();
        assert_eq!(
            record.vector_point_ids,
            vec![PointId("id1".to_string()), PointId("id2".to_string())]
        );

        let reserialized = serde_json::to_string(&record).unwrap();
        assert!(!reserialized.contains("qdrant_point_ids"));
        assert!(reserialized.contains("vector_point_ids"));
    }

    #[test]
    fn null_and_absent_qdrant_point_ids_both_migrate_to_empty_vec() {
        let absent = r#"{"file_path":"a.rs","status":"pending"}"#;
        let null = r#"{"file_path":"a.rs","status":"pending","qdrant_point_ids":null}"#;
        let r1: FileIndexingRecord = serde_json::from_str(absent).unwrap();
        let r2: FileIndexingRecord = serde_json::from_str(null).unwrap();
        assert!(r1.vector_point_ids.is_empty());
        assert!(r2.vector_point_ids.is_empty());
    }

    #[test]
    fn mixed_legacy_and_current_records_migrate_independently() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("indexing_progress.json");
        std::fs::write(
            &path,
            r#"{
                "file_records": {
                    "legacy.rs": {"file_path":"legacy.rs","status":"completed","qdrant_point_ids":["id1"]},
                    "current.rs": {"file_path":"current.rs","status":"completed","vector_point_ids":["id2"]},
                    "pending.rs": {"file_path":"pending.rs","status":"pending"}
                }
            }"#,
        )
        .unwrap();

        let log = IndexingProgressLog::new(&path);
        let metadata = log.load();
        assert_eq!(
            metadata.file_records["legacy.rs"].vector_point_ids,
            vec![PointId("id1".to_string())]
        );
        assert_eq!(
            metadata.file_records["current.rs"].vector_point_ids,
            vec![PointId("id2".to_string())]
        );
        assert!(metadata.file_records["pending.rs"].vector_point_ids.is_empty());
    }

    #[test]
    fn corrupted_progress_file_is_deleted_and_replaced_with_empty_state() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("indexing_progress.json");
        std::fs::write(&path, b"not json at all").unwrap();

        let log = IndexingProgressLog::new(&path);
        let metadata = log.load();
        assert!(metadata.file_records.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn round_trip_save_and_load_preserves_state() {
        let dir = TempDir::new().unwrap();
        let log = IndexingProgressLog::new(dir.path().join("indexing_progress.json"));

        log.start_indexing(OperationType::Full, "openai", "text-embedding-3-small", 3, Some("main"))
            .unwrap();
        log.record_file_result(
            "a.rs",
            FileIndexingStatus::Completed,
            2,
            vec![PointId("id1".to_string())],
            None,
        )
        .unwrap();

        let metadata = log.load();
        assert_eq!(metadata.current_branch.as_deref(), Some("main"));
        assert_eq!(metadata.file_records["a.rs"].chunks_created, 2);
    }

    #[test]
    fn update_current_branch_is_concurrency_safe() {
        let dir = TempDir::new().unwrap();
        let log = std::sync::Arc::new(IndexingProgressLog::new(dir.path().join("indexing_progress.json")));

        let handles: Vec<_> = (0..4)
            .map(|i| {
                let log = log.clone();
                std::thread::spawn(move || log.update_current_branch(&format!("branch-{i}")).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let metadata = log.load();
        assert!(metadata.current_branch.is_some());
    }
}
