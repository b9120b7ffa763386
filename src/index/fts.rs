//! FTSIndexManager (C6): postings over chunk text and path, grounded on the
//! `bm25` crate already in the dependency stack (the same crate this
//! codebase's `search/bm25.rs` wraps for hybrid search).
//!
//! Chunk text is not part of the payload fields the spec enumerates as
//! indexed/filterable, but it is exactly the kind of free-form data the
//! `ChunkRecord` payload's `extra` map exists to carry: `FileChunkingManager`
//! stashes each chunk's source text under `extra["text"]` at construction
//! time, and this manager is what reads it back out. Chunks without a
//! recoverable `text` entry (e.g. records written before this field existed)
//! are indexed on their path alone.
//!
//! Rather than betting on `bm25::SearchEngine`'s incremental-update surface,
//! this manager persists the raw corpus (point id + document text) and
//! refits a `bm25::Embedder` from it at load time; queries are scored by a
//! plain sparse dot-product over the fitted embeddings. This keeps the
//! persisted format a simple, inspectable `serde_json` document while still
//! using the crate for the part it is good at: BM25 term weighting.

use std::path::Path;

use bm25::Embedder;
use bm25::EmbedderBuilder;
use bm25::Language;
use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;
use crate::index::IndexKind;
use crate::index::rebuild;
use crate::index::scan_records;
use crate::types::PointId;

#[derive(Serialize, Deserialize)]
struct FtsCorpus {
    documents: Vec<(PointId, String)>,
}

pub struct FtsIndexManager {
    embedder: Embedder,
    postings: Vec<(PointId, Vec<(u32, f32)>)>,
}

impl FtsIndexManager {
    pub fn index_exists(indexes_dir: &Path) -> bool {
        IndexKind::Fts.final_path(indexes_dir).is_file()
    }

    pub fn rebuild_from_vectors(collection_dir: &Path) -> Result<()> {
        let records = scan_records(collection_dir)?;
        let indexes_dir = collection_dir.join("indexes");

        rebuild::rebuild_with_lock(&indexes_dir, IndexKind::Fts, move || {
            let documents: Vec<(PointId, String)> = records
                .iter()
                .map(|r| (r.id.clone(), document_text(r)))
                .collect();
            let corpus = FtsCorpus { documents };
            serde_json::to_vec(&corpus).map_err(EngineError::from)
        })?;
        Ok(())
    }

    pub fn load_index(indexes_dir: &Path) -> Result<Self> {
        let path = IndexKind::Fts.final_path(indexes_dir);
        let bytes = std::fs::read(&path).map_err(|e| EngineError::storage_io(&path, e))?;
        let corpus: FtsCorpus = serde_json::from_slice(&bytes).map_err(|e| EngineError::IndexCorrupt {
            index: "fts_index/index.json".to_string(),
            reason: e.to_string(),
        })?;

        if corpus.documents.is_empty() {
            let embedder = EmbedderBuilder::with_fit_to_corpus(Language::English, &[String::new()]).build();
            return Ok(Self {
                embedder,
                postings: Vec::new(),
            });
        }

        let texts: Vec<String> = corpus.documents.iter().map(|(_, text)| text.clone()).collect();
        let embedder = EmbedderBuilder::with_fit_to_corpus(Language::English, &texts).build();
        let postings = corpus
            .documents
            .into_iter()
            .map(|(id, text)| {
                // `Embedder::embed` returns a sparse vector as the
                // struct-of-arrays pair `Embedding { indices: Vec<u32>,
                // values: Vec<f32> }` (the same shape the crate's own docs
                // destructure when handing an embedding to a sparse-vector
                // store), not a `Vec` of per-token structs.
                let bm25::Embedding { indices, values } = embedder.embed(&text);
                (id, indices.into_iter().zip(values).collect())
            })
            .collect();

        Ok(Self { embedder, postings })
    }

    /// Candidate PointIDs for `query`, ranked by BM25 score descending.
    pub fn query(&self, query: &str, k: usize) -> Vec<(PointId, f32)> {
        let bm25::Embedding { indices, values } = self.embedder.embed(query);
        let query_weights: std::collections::HashMap<u32, f32> = indices.into_iter().zip(values).collect();

        let mut scored: Vec<(PointId, f32)> = self
            .postings
            .iter()
            .map(|(id, doc)| {
                let score = doc
                    .iter()
                    .filter_map(|(idx, weight)| query_weights.get(idx).map(|qw| qw * weight))
                    .sum();
                (id.clone(), score)
            })
            .filter(|(_, score)| *score > 0.0)
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        scored
    }

    pub fn doc_count(&self) -> usize {
        self.postings.len()
    }
}

fn document_text(record: &crate::types::ChunkRecord) -> String {
    let text = record
        .payload
        .extra
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("");
    format!("{text}\n{}", record.payload.file_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ChunkRecord;
    use crate::types::ContentType;
    use crate::types::Language as ChunkLanguage;
    use crate::types::Payload;
    use tempfile::TempDir;

    fn write_record(collection_dir: &Path, id: &str, path: &str, text: &str) {
        let mut extra = serde_json::Map::new();
        extra.insert("text".to_string(), serde_json::Value::String(text.to_string()));
        let record = ChunkRecord {
            id: PointId(id.to_string()),
            vector: vec![1.0],
            payload: Payload {
                project_id: "p".to_string(),
                file_path: path.to_string(),
                file_hash: "h".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                line_start: 1,
                line_end: 1,
                file_extension: "rs".to_string(),
                file_last_modified: Some(1.0),
                indexed_timestamp: 2.0,
                kind: ContentType::Content,
                language: ChunkLanguage::Rust,
                git_commit_hash: None,
                git_branch: None,
                git_hash: None,
                hidden_branches: Default::default(),
                extra,
            },
        };
        let (aa, bb) = record.id.shard();
        let dir = collection_dir.join("vectors").join(aa).join(bb);
        std::fs::create_dir_all(&dir).unwrap();
        crate::storage::atomic::write_json_atomic(&dir.join(format!("{id}.json")), &record).unwrap();
    }

    #[test]
    fn rebuild_then_query_finds_matching_document() {
        let dir = TempDir::new().unwrap();
        write_record(dir.path(), "aaaa1111", "src/auth.rs", "fn authenticate_user() {}");
        write_record(dir.path(), "bbbb2222", "src/render.rs", "fn draw_pixel_buffer() {}");

        FtsIndexManager::rebuild_from_vectors(dir.path()).unwrap();
        assert!(FtsIndexManager::index_exists(&dir.path().join("indexes")));

        let manager = FtsIndexManager::load_index(&dir.path().join("indexes")).unwrap();
        let hits = manager.query("authenticate", 5);
        assert_eq!(hits[0].0, PointId("aaaa1111".to_string()));
    }

    #[test]
    fn empty_collection_rebuilds_to_an_empty_index() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(dir.path().join("vectors")).unwrap();
        FtsIndexManager::rebuild_from_vectors(dir.path()).unwrap();

        let manager = FtsIndexManager::load_index(&dir.path().join("indexes")).unwrap();
        assert_eq!(manager.doc_count(), 0);
        assert!(manager.query("anything", 5).is_empty());
    }
}
