//! FileChunkingManager (C4): the per-file clean lifecycle — chunk → embed
//! batch → construct chunk records → persist → finalize. Owns the
//! universal timestamp rule: every ChunkRecord gets the same
//! `file_last_modified` (from one `stat` call) and its own
//! `indexed_timestamp` (captured at record-construction time), regardless
//! of whether the file is under version control.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;

use crate::chunking::Chunker;
use crate::embeddings::manager::BatchResult;
use crate::embeddings::manager::VectorCalculationManager;
use crate::indexing::progress::FileIndexingStatus;
use crate::indexing::progress::IndexingProgressLog;
use crate::slot::SlotStatus;
use crate::slot::SlotTracker;
use crate::storage::vector_store::FilesystemVectorStore;
use crate::types::ChunkRecord;
use crate::types::ContentType;
use crate::types::Language;
use crate::types::Payload;
use crate::types::PointId;

/// Metadata supplied by the ingestion driver for one file, carried onto
/// every ChunkRecord produced from it.
#[derive(Debug, Clone, Default)]
pub struct FileIngestMetadata {
    pub project_id: String,
    pub file_hash: String,
    pub git_commit_hash: Option<String>,
    pub git_branch: Option<String>,
    pub git_hash: Option<String>,
    pub hidden_branches: std::collections::BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct FileResult {
    pub success: bool,
    pub chunks_created: usize,
    pub point_ids: Vec<PointId>,
    pub error: Option<String>,
}

impl FileResult {
    fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            chunks_created: 0,
            point_ids: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// How long `process_file` busy-waits between slot-acquisition attempts
/// when the slot tracker is full (single-threaded cooperative wait, per
/// the slot tracker's contract).
const SLOT_RETRY_INTERVAL: Duration = Duration::from_millis(20);

pub struct FileChunkingManager {
    chunker: Chunker,
    vector_calc: Arc<VectorCalculationManager>,
    store: Arc<FilesystemVectorStore>,
    slots: Arc<SlotTracker>,
    progress: Arc<IndexingProgressLog>,
    collection: String,
}

impl FileChunkingManager {
    pub fn new(
        chunker: Chunker,
        vector_calc: Arc<VectorCalculationManager>,
        store: Arc<FilesystemVectorStore>,
        slots: Arc<SlotTracker>,
        progress: Arc<IndexingProgressLog>,
        collection: impl Into<String>,
    ) -> Self {
        Self {
            chunker,
            vector_calc,
            store,
            slots,
            progress,
            collection: collection.into(),
        }
    }

    /// Runs the full per-file lifecycle described in the component design:
    /// acquire slot → stat → chunk → embed → construct records → upsert →
    /// record point ids → release slot. Every exit path releases the slot
    /// and records a `FileIndexingRecord`; already-written chunks from a
    /// prior, now-failing pass are never rolled back (the next pass
    /// re-upserts them).
    pub async fn process_file(&self, path: &Path, metadata: FileIngestMetadata) -> FileResult {
        let file_path_str = path.to_string_lossy().to_string();
        let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);

        let slot_id = loop {
            match self.slots.acquire_slot(file_path_str.clone(), size) {
                Ok(id) => break id,
                Err(_) => tokio::time::sleep(SLOT_RETRY_INTERVAL).await,
            }
        };

        let result = self.process_file_slotted(path, &file_path_str, metadata, slot_id).await;

        self.slots.release_slot(slot_id);

        let status = if result.success {
            FileIndexingStatus::Completed
        } else {
            FileIndexingStatus::Failed
        };
        let _ = self.progress.record_file_result(
            &file_path_str,
            status,
            result.chunks_created,
            result.point_ids.clone(),
            result.error.clone(),
        );

        result
    }

    async fn process_file_slotted(
        &self,
        path: &Path,
        file_path_str: &str,
        metadata: FileIngestMetadata,
        slot_id: usize,
    ) -> FileResult {
        self.slots.update_status(slot_id, SlotStatus::Starting);

        // Step 2: stat once. Resolved through symlinks (`metadata`, not
        // `symlink_metadata`), per the universal timestamp rule.
        let file_last_modified = std::fs::metadata(path)
            .ok()
            .and_then(|m| m.modified().ok())
            .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
            .map(|d| d.as_secs_f64());

        self.slots.update_status(slot_id, SlotStatus::Chunking);
        let content = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) => return FileResult::failed(format!("failed to read file: {e}")),
        };
        let text = match Chunker::validate_bytes(&content) {
            Ok(text) => text,
            Err(e) => return FileResult::failed(e.to_string()),
        };

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_string();

        let chunks = match self.chunker.chunk_file(text, &extension) {
            Ok(chunks) => chunks,
            Err(e) => return FileResult::failed(e.to_string()),
        };
        if chunks.is_empty() {
            return FileResult {
                success: true,
                chunks_created: 0,
                point_ids: Vec::new(),
                error: None,
            };
        }

        // Step 4: one embedding batch for the whole file.
        self.slots.update_status(slot_id, SlotStatus::Vectorizing);
        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let embeddings = match self.vector_calc.submit_batch_task(texts).await {
            BatchResult::Ok { embeddings } => embeddings,
            BatchResult::Err { error } => return FileResult::failed(error),
        };
        if embeddings.len() != chunks.len() {
            return FileResult::failed(format!(
                "provider returned {} embeddings for {} chunks",
                embeddings.len(),
                chunks.len()
            ));
        }

        // Step 5: construct one ChunkRecord per chunk.
        let language = Language::from_extension(&extension);
        let records: Vec<ChunkRecord> = chunks
            .into_iter()
            .zip(embeddings)
            .map(|(chunk, vector)| {
                let mut extra = serde_json::Map::new();
                extra.insert("text".to_string(), serde_json::Value::String(chunk.text));

                ChunkRecord {
                    id: PointId::new(),
                    vector,
                    payload: Payload {
                        project_id: metadata.project_id.clone(),
                        file_path: file_path_str.to_string(),
                        file_hash: metadata.file_hash.clone(),
                        chunk_index: chunk.chunk_index,
                        total_chunks: chunk.total_chunks,
                        line_start: chunk.line_start,
                        line_end: chunk.line_end,
                        file_extension: extension.clone(),
                        file_last_modified,
                        indexed_timestamp: Utc::now().timestamp() as f64,
                        kind: ContentType::Content,
                        language,
                        git_commit_hash: metadata.git_commit_hash.clone(),
                        git_branch: metadata.git_branch.clone(),
                        git_hash: metadata.git_hash.clone(),
                        hidden_branches: metadata.hidden_branches.clone(),
                        extra,
                    },
                }
            })
            .collect();

        // Step 6: upsert in one batch.
        self.slots.update_status(slot_id, SlotStatus::Finalizing);
        if let Err(e) = self.store.upsert_points(&records, &self.collection) {
            return FileResult::failed(e.to_string());
        }

        let point_ids: Vec<PointId> = records.into_iter().map(|r| r.id).collect();
        FileResult {
            success: true,
            chunks_created: point_ids.len(),
            point_ids,
            error: None,
        }
    }
}

/// Git utilities for branch and commit detection, consumed by the
/// ingestion driver when populating `FileIngestMetadata`.
pub mod git {
    use std::path::Path;
    use std::process::Command;

    pub fn current_branch(repo_path: &Path) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "--abbrev-ref", "HEAD"])
            .current_dir(repo_path)
            .output()
            .ok()?;

        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    }

    pub fn current_commit(repo_path: &Path) -> Option<String> {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(repo_path)
            .output()
            .ok()?;

        if output.status.success() {
            Some(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            None
        }
    }

    pub fn is_git_repo(path: &Path) -> bool {
        Command::new("git")
            .args(["rev-parse", "--git-dir"])
            .current_dir(path)
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    pub fn changed_files_since(repo_path: &Path, commit: &str) -> Option<Vec<String>> {
        let output = Command::new("git")
            .args(["diff", "--name-only", commit, "HEAD"])
            .current_dir(repo_path)
            .output()
            .ok()?;

        if output.status.success() {
            let files = String::from_utf8_lossy(&output.stdout)
                .lines()
                .map(|s| s.to_string())
                .collect();
            Some(files)
        } else {
            None
        }
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn is_git_repo_does_not_panic_on_current_dir() {
            let current = std::env::current_dir().unwrap();
            let _ = is_git_repo(&current);
        }

        #[test]
        fn current_branch_does_not_panic_on_current_dir() {
            let current = std::env::current_dir().unwrap();
            let _ = current_branch(&current);
        }
    }
}
