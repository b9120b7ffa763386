//! Shared atomic-write helper: every record write in this crate goes
//! through `write to <final>.tmp → fsync → rename to <final>`, with the
//! rename as the linearization point. Used by the chunk store, the
//! payload indexes, and the auxiliary index managers alike.

use std::io::Write;
use std::path::Path;

use crate::error::EngineError;
use crate::error::Result;

pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = path
        .parent()
        .ok_or_else(|| EngineError::storage_io(path, "path has no parent directory"))?;
    std::fs::create_dir_all(parent).map_err(|e| EngineError::storage_io(parent, e))?;

    let tmp_path = path.with_extension(format!(
        "{}.tmp.{}",
        path.extension().and_then(|e| e.to_str()).unwrap_or(""),
        uuid::Uuid::new_v4().simple()
    ));

    let mut file = std::fs::File::create(&tmp_path).map_err(|e| EngineError::storage_io(&tmp_path, e))?;
    file.write_all(bytes).map_err(|e| EngineError::storage_io(&tmp_path, e))?;
    file.sync_all().map_err(|e| EngineError::storage_io(&tmp_path, e))?;
    drop(file);

    std::fs::rename(&tmp_path, path).map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        EngineError::storage_io(path, e)
    })?;
    Ok(())
}

pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &bytes)
}

pub fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let bytes = std::fs::read(path).map_err(|e| EngineError::storage_io(path, e))?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn write_atomic_leaves_no_tmp_file_on_success() {
        let dir = TempDir::new().unwrap();
        let final_path = dir.path().join("a").join("b.json");
        write_atomic(&final_path, b"{}").unwrap();
        assert!(final_path.exists());
        let leftovers: Vec<_> = std::fs::read_dir(final_path.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".tmp."))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn read_json_round_trips() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("value.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        let value: Vec<i32> = read_json(&path).unwrap();
        assert_eq!(value, vec![1, 2, 3]);
    }
}
