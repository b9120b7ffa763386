//! Engine (C12): the single top-level owner of the component graph.
//!
//! `Engine::new` wires C1–C11 together once per project; nothing here is a
//! global or lazily-initialized singleton (there is no `once_cell::Lazy`
//! instance registry, unlike this corpus's older per-workdir service
//! cache — every caller holds its own `Engine` and its own `Arc`s into the
//! components it owns).

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use sha2::Digest;
use sha2::Sha256;

use crate::chunking::Chunker;
use crate::config::EngineConfig;
use crate::embeddings::manager::VectorCalculationManager;
use crate::embeddings::provider::EmbeddingProvider;
use crate::error::EngineError;
use crate::error::Result;
use crate::index::FtsIndexManager;
use crate::index::HnswIndexManager;
use crate::index::IdIndexManager;
use crate::index::IndexKind;
use crate::index::hnsw::HnswParams;
use crate::index::rebuild::cleanup_orphaned_temp_files;
use crate::indexing::manager::FileChunkingManager;
use crate::indexing::manager::FileIngestMetadata;
use crate::indexing::manager::FileResult;
use crate::indexing::manager::git;
use crate::indexing::progress::IndexingProgressLog;
use crate::indexing::progress::IndexingSession;
use crate::indexing::progress::OperationType;
use crate::query::engine::EnhancedResult;
use crate::query::engine::QueryEngine;
use crate::query::engine::QueryRequest;
use crate::slot::SlotTracker;
use crate::storage::vector_store::FilesystemVectorStore;
use crate::types::Filter;

const COLLECTION: &str = "default";

/// Point-in-time counts for the collection `Engine` owns.
#[derive(Debug, Clone)]
pub struct EngineStats {
    pub total_chunk_records: usize,
    pub slot_capacity: usize,
    pub slots_in_use: usize,
    pub hnsw_index_present: bool,
    pub id_index_present: bool,
    pub fts_index_present: bool,
}

pub struct Engine {
    config: EngineConfig,
    project_root: PathBuf,
    store: Arc<FilesystemVectorStore>,
    vector_calc: Arc<VectorCalculationManager>,
    slots: Arc<SlotTracker>,
    progress: Arc<IndexingProgressLog>,
    provider: Arc<dyn EmbeddingProvider>,
    query_engine: QueryEngine,
}

impl Engine {
    /// Constructs every C1–C11 component for `project_root` from `config`
    /// and `provider`, and sweeps any `.tmp` rebuild leftovers older than
    /// `config.indexing.orphan_cleanup_age_secs` left behind by a crashed
    /// prior process.
    pub fn new(config: EngineConfig, provider: Arc<dyn EmbeddingProvider>, project_root: impl Into<PathBuf>) -> Result<Self> {
        let project_root = project_root.into();
        let store = Arc::new(FilesystemVectorStore::new(config.data_dir.join("index")));
        store.create_collection(COLLECTION, provider.dimension(), provider.model())?;

        let vector_calc = Arc::new(VectorCalculationManager::new(provider.clone(), config.indexing.max_workers));
        let slots = Arc::new(SlotTracker::new(config.indexing.slot_capacity));
        let progress = Arc::new(IndexingProgressLog::new(config.data_dir.join("indexing_progress.json")));

        let query_engine = QueryEngine::new(
            store.clone(),
            provider.clone(),
            &config.staleness,
            COLLECTION,
            project_root.clone(),
        );

        cleanup_orphaned_temp_files(
            &store.indexes_dir(COLLECTION),
            Duration::from_secs(config.indexing.orphan_cleanup_age_secs),
        )?;

        Ok(Self {
            config,
            project_root,
            store,
            vector_calc,
            slots,
            progress,
            provider,
            query_engine,
        })
    }

    fn file_manager(&self) -> FileChunkingManager {
        FileChunkingManager::new(
            Chunker::new(self.config.chunking.max_chunk_size, self.config.chunking.chunk_overlap),
            self.vector_calc.clone(),
            self.store.clone(),
            self.slots.clone(),
            self.progress.clone(),
            COLLECTION,
        )
    }

    fn ingest_metadata(&self, path: &Path) -> Result<FileIngestMetadata> {
        let bytes = std::fs::read(path).map_err(|e| EngineError::storage_io(path, e))?;
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let file_hash = hex::encode(hasher.finalize());

        let (git_commit_hash, git_branch) = if git::is_git_repo(&self.project_root) {
            (
                git::current_commit(&self.project_root),
                git::current_branch(&self.project_root),
            )
        } else {
            (None, None)
        };

        Ok(FileIngestMetadata {
            project_id: self.project_root.to_string_lossy().to_string(),
            file_hash,
            git_commit_hash,
            git_branch,
            git_hash: None,
            hidden_branches: Default::default(),
        })
    }

    /// Ingests a single file through the C4 lifecycle.
    pub async fn index_file(&self, path: &Path) -> Result<FileResult> {
        if let Ok(metadata) = std::fs::metadata(path) {
            let max_bytes = (self.config.indexing.max_file_size_mb.max(0) as u64) * 1024 * 1024;
            if max_bytes > 0 && metadata.len() > max_bytes {
                return Ok(FileResult {
                    success: false,
                    chunks_created: 0,
                    point_ids: Vec::new(),
                    error: Some(format!(
                        "file exceeds configured max_file_size_mb ({} bytes > {} bytes)",
                        metadata.len(),
                        max_bytes
                    )),
                });
            }
        }

        let metadata = self.ingest_metadata(path)?;
        Ok(self.file_manager().process_file(path, metadata).await)
    }

    /// Walks `root` and indexes every regular file under it, streaming each
    /// file's result over `progress_tx` as it completes. Grounded on
    /// `indexing/manager.rs`'s per-file progress recording — this just adds
    /// the workspace-wide walk and session bookkeeping around it.
    pub async fn index_workspace(
        &self,
        root: &Path,
        progress_tx: Option<tokio::sync::mpsc::Sender<FileResult>>,
    ) -> Result<IndexingSession> {
        let files = walk_files(root);
        let branch = if git::is_git_repo(&self.project_root) {
            git::current_branch(&self.project_root)
        } else {
            None
        };

        let provider_name = self
            .config
            .embedding
            .as_ref()
            .map(|e| e.provider.as_str())
            .unwrap_or("unknown");
        let session = self.progress.start_indexing(
            OperationType::Full,
            provider_name,
            self.provider.model(),
            files.len(),
            branch.as_deref(),
        )?;

        for file in files {
            let result = self.index_file(&file).await;
            let result = result.unwrap_or_else(|e| FileResult {
                success: false,
                chunks_created: 0,
                point_ids: Vec::new(),
                error: Some(e.to_string()),
            });
            if let Some(tx) = &progress_tx {
                let _ = tx.send(result).await;
            }
        }

        Ok(session)
    }

    /// Runs a ranked query through C10 with no temporal extension.
    pub async fn query(&self, text: &str, filter: Option<Filter>, k: usize) -> Result<Vec<EnhancedResult>> {
        self.query_engine
            .query(QueryRequest {
                text: text.to_string(),
                filter,
                k,
                temporal: None,
            })
            .await
    }

    /// Runs a query carrying the optional temporal extensions from §4.10.
    pub async fn query_with_temporal(&self, request: QueryRequest) -> Result<Vec<EnhancedResult>> {
        self.query_engine.query(request).await
    }

    /// Rebuilds one of the three auxiliary indexes (C6) via the shared
    /// lock/tmp/rename protocol (C7).
    pub fn rebuild(&self, index: IndexKind) -> Result<()> {
        let collection_dir = self.store.collection_dir(COLLECTION);
        match index {
            IndexKind::Hnsw => HnswIndexManager::rebuild_from_vectors(&collection_dir, HnswParams::default()),
            IndexKind::Id => IdIndexManager::rebuild_from_vectors(&collection_dir),
            IndexKind::Fts => FtsIndexManager::rebuild_from_vectors(&collection_dir),
        }
    }

    pub fn stats(&self) -> Result<EngineStats> {
        let records = self.store.scan_all(COLLECTION)?;
        let indexes_dir = self.store.indexes_dir(COLLECTION);
        let snapshot = self.slots.snapshot();
        Ok(EngineStats {
            total_chunk_records: records.len(),
            slot_capacity: self.slots.capacity(),
            slots_in_use: snapshot.len(),
            hnsw_index_present: HnswIndexManager::index_exists(&indexes_dir),
            id_index_present: IdIndexManager::index_exists(&indexes_dir),
            fts_index_present: FtsIndexManager::index_exists(&indexes_dir),
        })
    }
}

fn walk_files(root: &Path) -> Vec<PathBuf> {
    let mut out = Vec::new();
    let mut stack = vec![root.to_path_buf()];
    while let Some(dir) = stack.pop() {
        let Ok(entries) = std::fs::read_dir(&dir) else { continue };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                if path.file_name().and_then(|n| n.to_str()) == Some(".git") {
                    continue;
                }
                stack.push(path);
            } else if path.is_file() {
                out.push(path);
            }
        }
    }
    out
}
