//! The on-disk chunk store.
//!
//! ```text
//! <root>/<collection>/
//!   collection_meta.json
//!   vectors/<aa>/<bb>/<POINT_ID>.json
//!   indexes/
//!     hnsw_index.bin
//!     id_index.bin
//!     fts_index/…
//!     payload/<field>/<value_hash>.list
//!     *.tmp
//!     *.lock
//! ```

use std::path::Path;
use std::path::PathBuf;

use chrono::Utc;

use crate::error::EngineError;
use crate::error::Result;
use crate::index::hnsw::HnswIndexManager;
use crate::storage::atomic;
use crate::storage::payload_index::PayloadIndex;
use crate::types::ChunkRecord;
use crate::types::CollectionMeta;
use crate::types::Filter;
use crate::types::FilterClause;
use crate::types::IndexedField;
use crate::types::PayloadValue;
use crate::types::PointId;

pub struct FilesystemVectorStore {
    root: PathBuf,
}

impl FilesystemVectorStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn collection_dir(&self, collection: &str) -> PathBuf {
        self.root.join(collection)
    }

    fn vectors_dir(&self, collection: &str) -> PathBuf {
        self.collection_dir(collection).join("vectors")
    }

    pub fn indexes_dir(&self, collection: &str) -> PathBuf {
        self.collection_dir(collection).join("indexes")
    }

    fn meta_path(&self, collection: &str) -> PathBuf {
        self.collection_dir(collection).join("collection_meta.json")
    }

    fn record_path(&self, collection: &str, id: &PointId) -> PathBuf {
        let (aa, bb) = id.shard();
        self.vectors_dir(collection)
            .join(aa)
            .join(bb)
            .join(format!("{id}.json"))
    }

    /// Idempotent: creates `collection_meta.json` atomically if absent;
    /// returns `Ok` without rewriting it if the collection already exists.
    pub fn create_collection(&self, name: &str, dim: usize, model: &str) -> Result<()> {
        if self.collection_exists(name) {
            return Ok(());
        }
        let meta = CollectionMeta {
            vector_dim: dim,
            model: model.to_string(),
            created_at: Utc::now(),
        };
        atomic::write_json_atomic(&self.meta_path(name), &meta)?;
        self.ensure_payload_indexes(name)?;
        Ok(())
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.meta_path(name).is_file()
    }

    pub fn load_meta(&self, name: &str) -> Result<CollectionMeta> {
        atomic::read_json(&self.meta_path(name))
    }

    /// Writes every point via temp+rename into its shard and updates the
    /// PayloadIndex. Order within the call is preserved for observers:
    /// records are written sequentially in caller order, so a concurrent
    /// reader racing this call never sees record `i+1` without `i`.
    pub fn upsert_points(&self, points: &[ChunkRecord], collection: &str) -> Result<()> {
        let meta = self.load_meta(collection)?;
        let payload_index = PayloadIndex::new(&self.indexes_dir(collection));

        for record in points {
            if record.vector.len() != meta.vector_dim {
                return Err(EngineError::StorageIoFailed {
                    path: self.record_path(collection, &record.id),
                    cause: format!(
                        "vector length {} does not match collection dimension {}",
                        record.vector.len(),
                        meta.vector_dim
                    ),
                });
            }
            let path = self.record_path(collection, &record.id);
            atomic::write_json_atomic(&path, record)?;
            self.index_payload(&payload_index, record)?;
        }
        Ok(())
    }

    fn index_payload(&self, payload_index: &PayloadIndex, record: &ChunkRecord) -> Result<()> {
        let kind = match record.payload.kind {
            crate::types::ContentType::Content => "content",
            crate::types::ContentType::Metadata => "metadata",
        };
        payload_index.add(IndexedField::Type, kind, &record.id)?;
        payload_index.add(IndexedField::Path, &record.payload.file_path, &record.id)?;
        if let Some(branch) = &record.payload.git_branch {
            payload_index.add(IndexedField::GitBranch, branch, &record.id)?;
        }
        if let Some(mtime) = record.payload.file_last_modified {
            payload_index.add(IndexedField::FileMtime, &mtime.to_string(), &record.id)?;
        }
        for hidden in &record.payload.hidden_branches {
            payload_index.add(IndexedField::HiddenBranches, hidden, &record.id)?;
        }
        Ok(())
    }

    fn unindex_payload(&self, payload_index: &PayloadIndex, record: &ChunkRecord) -> Result<()> {
        let kind = match record.payload.kind {
            crate::types::ContentType::Content => "content",
            crate::types::ContentType::Metadata => "metadata",
        };
        payload_index.remove(IndexedField::Type, kind, &record.id)?;
        payload_index.remove(IndexedField::Path, &record.payload.file_path, &record.id)?;
        if let Some(branch) = &record.payload.git_branch {
            payload_index.remove(IndexedField::GitBranch, branch, &record.id)?;
        }
        if let Some(mtime) = record.payload.file_last_modified {
            payload_index.remove(IndexedField::FileMtime, &mtime.to_string(), &record.id)?;
        }
        for hidden in &record.payload.hidden_branches {
            payload_index.remove(IndexedField::HiddenBranches, hidden, &record.id)?;
        }
        Ok(())
    }

    /// Removes shard files and payload postings referencing `ids`. Missing
    /// ids are silently skipped (idempotent delete).
    pub fn delete_points(&self, ids: &[PointId], collection: &str) -> Result<()> {
        let payload_index = PayloadIndex::new(&self.indexes_dir(collection));
        for id in ids {
            let path = self.record_path(collection, id);
            if let Ok(record) = self.get_point(collection, id) {
                self.unindex_payload(&payload_index, &record)?;
            }
            if path.exists() {
                std::fs::remove_file(&path).map_err(|e| EngineError::storage_io(&path, e))?;
            }
        }
        Ok(())
    }

    pub fn get_point(&self, collection: &str, id: &PointId) -> Result<ChunkRecord> {
        let path = self.record_path(collection, id);
        if !path.exists() {
            return Err(EngineError::NotFound {
                what: format!("point {id} in collection {collection}"),
            });
        }
        atomic::read_json(&path)
    }

    /// All ChunkRecords currently on disk for the collection, in shard scan
    /// order. Used by the auxiliary index managers at rebuild time and by
    /// the linear-scan search fallback.
    pub fn scan_all(&self, collection: &str) -> Result<Vec<ChunkRecord>> {
        let vectors_dir = self.vectors_dir(collection);
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
                        match atomic::read_json::<ChunkRecord>(&path) {
                            Ok(record) => records.push(record),
                            Err(_) => continue, // tolerate a record racing deletion
                        }
                    }
                }
            }
        }
        Ok(records)
    }

    /// Stable iteration order by PointID; `cursor` is the last PointID seen
    /// on the previous page (exclusive).
    pub fn scroll_points(
        &self,
        collection: &str,
        filter: &Filter,
        limit: usize,
        cursor: Option<&PointId>,
    ) -> Result<(Vec<ChunkRecord>, Option<PointId>)> {
        let mut records = self.scan_all(collection)?;
        records.sort_by(|a, b| a.id.cmp(&b.id));

        let start = match cursor {
            Some(c) => records.partition_point(|r| &r.id <= c),
            None => 0,
        };

        let mut page = Vec::with_capacity(limit);
        let mut next_cursor = None;
        for record in &records[start..] {
            if !matches_filter(record, filter) {
                continue;
            }
            if page.len() == limit {
                next_cursor = Some(record.id.clone());
                break;
            }
            page.push(record.clone());
        }
        if next_cursor.is_none() {
            if let Some(last) = page.last() {
                if records.iter().any(|r| r.id > last.id) {
                    next_cursor = Some(last.id.clone());
                }
            }
        }
        Ok((page, next_cursor))
    }

    /// Uses the HNSW auxiliary index when present; otherwise falls back to
    /// a linear scan over every vector in the collection.
    pub fn search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<(PointId, f32)>> {
        let indexes_dir = self.indexes_dir(collection);
        if HnswIndexManager::index_exists(&indexes_dir) {
            let manager = HnswIndexManager::load_index(&indexes_dir)?;
            let mut hits = manager.query(vector, k.max(1) * 4)?;
            if let Some(filter) = filter {
                hits.retain(|(id, _)| {
                    self.get_point(collection, id)
                        .map(|r| matches_filter(&r, filter))
                        .unwrap_or(false) // missing ChunkRecords are dropped silently
                });
            }
            hits.truncate(k);
            return Ok(hits);
        }

        self.linear_scan_search(collection, vector, k, filter)
    }

    fn linear_scan_search(
        &self,
        collection: &str,
        vector: &[f32],
        k: usize,
        filter: Option<&Filter>,
    ) -> Result<Vec<(PointId, f32)>> {
        let records = self.scan_all(collection)?;
        let mut scored: Vec<(PointId, f32)> = records
            .iter()
            .filter(|r| filter.map(|f| matches_filter(r, f)).unwrap_or(true))
            .map(|r| (r.id.clone(), cosine_distance(vector, &r.vector)))
            .collect();
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);
        Ok(scored)
    }

    pub fn ensure_payload_indexes(&self, collection: &str) -> Result<()> {
        PayloadIndex::new(&self.indexes_dir(collection)).ensure_indexes()
    }

    pub fn health_check(&self) -> bool {
        std::fs::create_dir_all(&self.root).is_ok()
            && std::fs::metadata(&self.root)
                .map(|m| !m.permissions().readonly())
                .unwrap_or(false)
    }
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

pub fn cosine_distance(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return f32::MAX;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 1.0;
    }
    1.0 - (dot / (norm_a * norm_b))
}

fn matches_filter(record: &ChunkRecord, filter: &Filter) -> bool {
    filter.must.iter().all(|clause| match clause {
        FilterClause::MatchValue { field, value } => field_payload_value(record, field)
            .map(|v| v.matches_exact(value))
            .unwrap_or(false),
        FilterClause::MatchText { field, substring } => field_payload_value(record, field)
            .map(|v| v.contains_substring(substring))
            .unwrap_or(false),
        FilterClause::RangeGte { field, value } => field_number(record, field).map(|v| v >= *value).unwrap_or(false),
        FilterClause::RangeLte { field, value } => field_number(record, field).map(|v| v <= *value).unwrap_or(false),
        FilterClause::AnyOf { field, values } => field_payload_value(record, field)
            .map(|v| v.matches_any(values))
            .unwrap_or(false),
    })
}

/// The typed value a filter clause matches `field` against. Keyword fields
/// are exact-match metadata; `extra`'s JSON is coerced into the closest
/// `PayloadValue` variant (string → `Text`, number → `Integer`, array of
/// strings → `Array`).
fn field_payload_value(record: &ChunkRecord, field: &str) -> Option<PayloadValue> {
    match field {
        "type" => Some(PayloadValue::Keyword(
            match record.payload.kind {
                crate::types::ContentType::Content => "content",
                crate::types::ContentType::Metadata => "metadata",
            }
            .to_string(),
        )),
        "path" | "file_path" => Some(PayloadValue::Keyword(record.payload.file_path.clone())),
        "git_branch" => record.payload.git_branch.clone().map(PayloadValue::Keyword),
        "language" => Some(PayloadValue::Keyword(record.payload.language.as_str().to_string())),
        "hidden_branches" => Some(PayloadValue::Array(
            record.payload.hidden_branches.iter().cloned().collect(),
        )),
        other => record.payload.extra.get(other).and_then(json_to_payload_value),
    }
}

fn json_to_payload_value(value: &serde_json::Value) -> Option<PayloadValue> {
    match value {
        serde_json::Value::String(s) => Some(PayloadValue::Text(s.clone())),
        serde_json::Value::Number(n) => n.as_i64().map(PayloadValue::Integer),
        serde_json::Value::Array(items) => Some(PayloadValue::Array(
            items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
        )),
        _ => None,
    }
}

fn field_number(record: &ChunkRecord, field: &str) -> Option<f64> {
    match field {
        "file_mtime" | "file_last_modified" => record.payload.file_last_modified,
        "indexed_timestamp" => Some(record.payload.indexed_timestamp),
        other => record.payload.extra.get(other).and_then(|v| v.as_f64()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentType;
    use crate::types::Language;
    use crate::types::Payload;
    use tempfile::TempDir;

    fn sample_record(id: &str, path: &str, vector: Vec<f32>) -> ChunkRecord {
        ChunkRecord {
            id: PointId(id.to_string()),
            vector,
            payload: Payload {
                project_id: "proj".to_string(),
                file_path: path.to_string(),
                file_hash: "hash".to_string(),
                chunk_index: 0,
                total_chunks: 1,
                line_start: 1,
                line_end: 1,
                file_extension: "rs".to_string(),
                file_last_modified: Some(1_700_000_000.0),
                indexed_timestamp: 1_700_000_001.0,
                kind: ContentType::Content,
                language: Language::Rust,
                git_commit_hash: None,
                git_branch: None,
                git_hash: None,
                hidden_branches: Default::default(),
                extra: Default::default(),
            },
        }
    }

    #[test]
    fn create_collection_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 3, "test-model").unwrap();
        store.create_collection("c", 3, "test-model").unwrap();
        assert!(store.collection_exists("c"));
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 3, "m").unwrap();
        let record = sample_record("abc123", "src/main.rs", vec![1.0, 0.0, 0.0]);
        store.upsert_points(&[record.clone()], "c").unwrap();

        let fetched = store.get_point("c", &record.id).unwrap();
        assert_eq!(fetched.payload.file_path, "src/main.rs");
    }

    #[test]
    fn upsert_rejects_mismatched_dimension() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 3, "m").unwrap();
        let record = sample_record("abc", "f.rs", vec![1.0, 2.0]);
        let err = store.upsert_points(&[record], "c").unwrap_err();
        assert_eq!(err.kind(), "StorageIOFailed");
    }

    #[test]
    fn delete_point_removes_file_and_postings() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 3, "m").unwrap();
        let record = sample_record("abc123", "src/main.rs", vec![1.0, 0.0, 0.0]);
        store.upsert_points(&[record.clone()], "c").unwrap();

        store.delete_points(&[record.id.clone()], "c").unwrap();
        assert!(store.get_point("c", &record.id).is_err());

        let payload_index = PayloadIndex::new(&store.indexes_dir("c"));
        let postings = payload_index.lookup(IndexedField::Path, "src/main.rs").unwrap();
        assert!(!postings.contains(&record.id));
    }

    #[test]
    fn scroll_points_is_stable_and_paginates() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 2, "m").unwrap();
        let records: Vec<_> = (0..5)
            .map(|i| sample_record(&format!("id{i:02}"), &format!("f{i}.rs"), vec![i as f32, 0.0]))
            .collect();
        store.upsert_points(&records, "c").unwrap();

        let (page1, cursor1) = store.scroll_points("c", &Filter::default(), 2, None).unwrap();
        assert_eq!(page1.len(), 2);
        assert!(cursor1.is_some());

        let (page2, _) = store
            .scroll_points("c", &Filter::default(), 2, cursor1.as_ref())
            .unwrap();
        assert_eq!(page2.len(), 2);
        assert_ne!(page1[0].id, page2[0].id);
    }

    #[test]
    fn linear_scan_search_orders_by_distance() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 2, "m").unwrap();
        let close = sample_record("a1", "a.rs", vec![1.0, 0.0]);
        let far = sample_record("b2", "b.rs", vec![0.0, 1.0]);
        store.upsert_points(&[close.clone(), far], "c").unwrap();

        let results = store.search("c", &[1.0, 0.0], 1, None).unwrap();
        assert_eq!(results[0].0, close.id);
    }

    #[test]
    fn filter_by_path_substring() {
        let dir = TempDir::new().unwrap();
        let store = FilesystemVectorStore::new(dir.path());
        store.create_collection("c", 2, "m").unwrap();
        let a = sample_record("a1", "src/main.rs", vec![1.0, 0.0]);
        let b = sample_record("b2", "tests/lib.rs", vec![0.0, 1.0]);
        store.upsert_points(&[a.clone(), b], "c").unwrap();

        let filter = Filter {
            must: vec![FilterClause::MatchText {
                field: "path".to_string(),
                substring: "src/".to_string(),
            }],
        };
        let (results, _) = store.scroll_points("c", &filter, 10, None).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].id, a.id);
    }
}
