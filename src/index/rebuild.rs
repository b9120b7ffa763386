//! BackgroundIndexRebuilder (C7): the exclusive-lock, tmp-file-then-rename
//! protocol shared by all three auxiliary index managers. Grounded on the
//! lock → build-into-temp → fsync → rename → release pattern this corpus's
//! `hyperspace-db` uses for its segment compaction, adapted here from an
//! in-memory `ArcSwap` hot-swap to a file-rename linearization point.

use std::fs::File;
use std::io::Write;
use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;
use std::time::Instant;

use fs2::FileExt;

use crate::error::EngineError;
use crate::error::Result;

/// Which auxiliary index a rebuild targets. Each variant names its final
/// file (or directory, for FTS) relative to `indexes_dir`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Hnsw,
    Id,
    Fts,
}

impl IndexKind {
    pub fn final_path(&self, indexes_dir: &Path) -> PathBuf {
        match self {
            Self::Hnsw => indexes_dir.join("hnsw_index.bin"),
            Self::Id => indexes_dir.join("id_index.bin"),
            Self::Fts => indexes_dir.join("fts_index").join("index.json"),
        }
    }

    fn lock_name(&self) -> &'static str {
        match self {
            Self::Hnsw => "hnsw_index.bin.lock",
            Self::Id => "id_index.bin.lock",
            Self::Fts => "fts_index.lock",
        }
    }
}

/// How long a rebuild will wait to acquire the index's exclusive lock
/// before giving up with `LockUnavailable`.
const LOCK_ACQUIRE_DEADLINE: Duration = Duration::from_secs(30);
const LOCK_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Run `build` under the index's exclusive lock, write its output to
/// `<final>.tmp`, fsync, then rename into place. Returns the duration of
/// the rename itself — the step budgeted at < 2 ms by the spec.
///
/// `build` may take arbitrarily long; queries against the pre-rebuild file
/// continue to succeed throughout, since the old file is untouched until
/// the rename.
pub fn rebuild_with_lock(
    indexes_dir: &Path,
    kind: IndexKind,
    build: impl FnOnce() -> Result<Vec<u8>>,
) -> Result<Duration> {
    std::fs::create_dir_all(indexes_dir).map_err(|e| EngineError::storage_io(indexes_dir, e))?;

    let lock_path = indexes_dir.join(kind.lock_name());
    let lock_file = std::fs::OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| EngineError::storage_io(&lock_path, e))?;
    acquire_exclusive_with_deadline(&lock_file, &lock_path, LOCK_ACQUIRE_DEADLINE)?;

    let result = (|| {
        let bytes = build()?;

        let final_path = kind.final_path(indexes_dir);
        let parent = final_path
            .parent()
            .ok_or_else(|| EngineError::storage_io(&final_path, "path has no parent directory"))?;
        std::fs::create_dir_all(parent).map_err(|e| EngineError::storage_io(parent, e))?;

        let tmp_path = PathBuf::from(format!("{}.tmp", final_path.display()));
        let mut file = File::create(&tmp_path).map_err(|e| EngineError::storage_io(&tmp_path, e))?;
        file.write_all(&bytes).map_err(|e| EngineError::storage_io(&tmp_path, e))?;
        file.sync_all().map_err(|e| EngineError::storage_io(&tmp_path, e))?;
        drop(file);

        let swap_start = Instant::now();
        std::fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = std::fs::remove_file(&tmp_path);
            EngineError::storage_io(&final_path, e)
        })?;
        Ok(swap_start.elapsed())
    })();

    let _ = FileExt::unlock(&lock_file);
    result
}

fn acquire_exclusive_with_deadline(lock_file: &File, lock_path: &Path, deadline: Duration) -> Result<()> {
    let start = Instant::now();
    loop {
        match lock_file.try_lock_exclusive() {
            Ok(()) => return Ok(()),
            Err(_) if start.elapsed() < deadline => std::thread::sleep(LOCK_POLL_INTERVAL),
            Err(_) => {
                return Err(EngineError::LockUnavailable {
                    lock: lock_path.display().to_string(),
                });
            }
        }
    }
}

/// Scans `indexes_dir` (recursively, so `fts_index/*.tmp` is covered too)
/// for `*.tmp` files orphaned by a crash between step 2 (write) and step 4
/// (rename). Files older than `age_threshold` are removed; the count
/// removed is returned. Typical invocation: on process start, threshold
/// 3600 s.
pub fn cleanup_orphaned_temp_files(indexes_dir: &Path, age_threshold: Duration) -> Result<usize> {
    if !indexes_dir.is_dir() {
        return Ok(0);
    }
    let mut removed = 0;
    let mut stack = vec![indexes_dir.to_path_buf()];
    let now = std::time::SystemTime::now();

    while let Some(dir) = stack.pop() {
        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue, // directory vanished underneath us; not our problem
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|e| e.to_str()) != Some("tmp")
                && !path.to_string_lossy().ends_with(".tmp")
            {
                continue;
            }
            let Ok(metadata) = entry.metadata() else { continue };
            let Ok(modified) = metadata.modified() else { continue };
            let Ok(age) = now.duration_since(modified) else { continue };
            if age > age_threshold && std::fs::remove_file(&path).is_ok() {
                removed += 1;
                tracing::debug!(path = %path.display(), "removed orphaned rebuild temp file");
            }
        }
    }
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn rebuild_leaves_no_tmp_and_completes_final_write() {
        let dir = TempDir::new().unwrap();
        let swap_duration = rebuild_with_lock(dir.path(), IndexKind::Id, || Ok(b"hello".to_vec())).unwrap();
        assert!(swap_duration < Duration::from_millis(200));

        let final_path = IndexKind::Id.final_path(dir.path());
        assert_eq!(std::fs::read(&final_path).unwrap(), b"hello");
        assert!(!PathBuf::from(format!("{}.tmp", final_path.display())).exists());
    }

    #[test]
    fn second_rebuild_sees_first_rebuilds_output_as_its_input() {
        let dir = TempDir::new().unwrap();
        rebuild_with_lock(dir.path(), IndexKind::Hnsw, || Ok(b"v1".to_vec())).unwrap();
        let final_path = IndexKind::Hnsw.final_path(dir.path());
        let seen_before_second = std::fs::read(&final_path).unwrap();
        assert_eq!(seen_before_second, b"v1");

        rebuild_with_lock(dir.path(), IndexKind::Hnsw, || Ok(b"v2".to_vec())).unwrap();
        assert_eq!(std::fs::read(&final_path).unwrap(), b"v2");
    }

    #[test]
    fn cleanup_removes_only_aged_tmp_files() {
        let dir = TempDir::new().unwrap();
        std::fs::create_dir_all(&dir).unwrap();
        let old_tmp = dir.path().join("hnsw_index.bin.tmp");
        std::fs::write(&old_tmp, b"orphan").unwrap();

        // Freshly written files are never considered aged at threshold 0,
        // so assert on count shape rather than exact timing flakiness.
        let removed = cleanup_orphaned_temp_files(dir.path(), Duration::from_secs(3600)).unwrap();
        assert_eq!(removed, 0);
        assert!(old_tmp.exists());

        let removed_now = cleanup_orphaned_temp_files(dir.path(), Duration::from_secs(0)).unwrap();
        assert_eq!(removed_now, 1);
        assert!(!old_tmp.exists());
    }
}
