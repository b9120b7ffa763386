//! PayloadIndex: a secondary on-disk map from (field, value) to the set of
//! PointIDs matching. One postings file per (field, value) pair, named by a
//! hash of the value so arbitrary strings are safe path components.

use std::collections::BTreeSet;
use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;

use crate::error::Result;
use crate::storage::atomic;
use crate::types::IndexedField;
use crate::types::PointId;

pub struct PayloadIndex {
    root: PathBuf,
}

impl PayloadIndex {
    pub fn new(indexes_root: &Path) -> Self {
        Self {
            root: indexes_root.join("payload"),
        }
    }

    fn postings_path(&self, field: IndexedField, value: &str) -> PathBuf {
        let hash = hex::encode(sha2::Sha256::digest(value.as_bytes()));
        self.root.join(field.as_str()).join(format!("{hash}.list"))
    }

    /// Idempotently ensures the five required index directories exist.
    pub fn ensure_indexes(&self) -> Result<()> {
        for field in IndexedField::ALL {
            std::fs::create_dir_all(self.root.join(field.as_str()))
                .map_err(|e| crate::error::EngineError::storage_io(&self.root, e))?;
        }
        Ok(())
    }

    fn load_postings(&self, field: IndexedField, value: &str) -> Result<BTreeSet<PointId>> {
        let path = self.postings_path(field, value);
        if !path.exists() {
            return Ok(BTreeSet::new());
        }
        atomic::read_json(&path)
    }

    fn save_postings(&self, field: IndexedField, value: &str, ids: &BTreeSet<PointId>) -> Result<()> {
        let path = self.postings_path(field, value);
        if ids.is_empty() {
            let _ = std::fs::remove_file(&path);
            return Ok(());
        }
        atomic::write_json_atomic(&path, ids)
    }

    /// Add `id` to the postings list for `(field, value)`.
    pub fn add(&self, field: IndexedField, value: &str, id: &PointId) -> Result<()> {
        let mut postings = self.load_postings(field, value)?;
        postings.insert(id.clone());
        self.save_postings(field, value, &postings)
    }

    /// Remove `id` from the postings list for `(field, value)`.
    pub fn remove(&self, field: IndexedField, value: &str, id: &PointId) -> Result<()> {
        let mut postings = self.load_postings(field, value)?;
        postings.remove(id);
        self.save_postings(field, value, &postings)
    }

    /// PointIDs currently indexed for `(field, value)`.
    pub fn lookup(&self, field: IndexedField, value: &str) -> Result<BTreeSet<PointId>> {
        self.load_postings(field, value)
    }
}
