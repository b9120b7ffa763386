//! StalenessDetector (C9): UTC-normalized comparison of an indexed result's
//! timestamp against the on-disk file's current mtime, with mode-aware
//! (local/remote) timestamp selection, tri-color indicator tiers, and a
//! bounded LRU cache of recent `(path, mtime)` lookups.
//!
//! Grounded on this corpus's `remote/staleness_detector.py`-equivalent test
//! suite (`original_source/tests/unit/remote/test_universal_staleness_detection.py`):
//! local mode prefers `file_last_modified`, remote mode prefers
//! `indexed_timestamp`, and both modes must agree on `is_stale` and sort
//! order whenever the two timestamp sources carry equivalent values.

use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;
use std::time::Instant;

use lru::LruCache;

use crate::config::StalenessMode;

/// A query result's timestamp facts, as carried on its `ChunkRecord`
/// payload, plus the similarity score used for the secondary sort key.
#[derive(Debug, Clone)]
pub struct StalenessInput {
    pub file_path: String,
    pub file_last_modified: Option<f64>,
    pub indexed_timestamp: Option<f64>,
    pub score: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StalenessTier {
    Fresh,
    Minor,
    Moderate,
    Major,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StalenessIndicator {
    pub tier: StalenessTier,
    pub is_stale: bool,
    pub delta_seconds: f64,
}

impl StalenessIndicator {
    /// Human-friendly label, e.g. `Fresh`, `30m stale`, `1h stale`, `1d stale`.
    pub fn label(&self) -> String {
        if self.tier == StalenessTier::Fresh {
            return "Fresh".to_string();
        }
        let secs = self.delta_seconds.max(0.0);
        if secs < 3600.0 {
            format!("{}m stale", (secs / 60.0).round().max(1.0) as u64)
        } else if secs < 86_400.0 {
            format!("{}h stale", (secs / 3600.0).round().max(1.0) as u64)
        } else {
            format!("{}d stale", (secs / 86_400.0).round().max(1.0) as u64)
        }
    }
}

/// Bounded LRU cache of `(path, local_mtime)` lookups, so repeatedly
/// enhancing results for the same file within one query doesn't re-stat it.
struct MtimeCache {
    entries: LruCache<String, (f64, Instant)>,
    ttl: Duration,
    hits: u64,
}

pub struct StalenessDetector {
    mode: StalenessMode,
    threshold_seconds: f64,
    cache: Mutex<MtimeCache>,
}

impl StalenessDetector {
    pub fn new(mode: StalenessMode, threshold_seconds: f64, cache_capacity: usize, cache_ttl: Duration) -> Self {
        Self {
            mode,
            threshold_seconds,
            cache: Mutex::new(MtimeCache {
                entries: LruCache::new(NonZeroUsize::new(cache_capacity.max(1)).unwrap()),
                ttl: cache_ttl,
                hits: 0,
            }),
        }
    }

    /// The timestamp this detector treats as "what the index believes",
    /// selected per the mode-aware fallback rule: local prefers
    /// `file_last_modified`, remote prefers `indexed_timestamp`.
    fn index_timestamp(&self, input: &StalenessInput) -> Option<f64> {
        match self.mode {
            StalenessMode::Local => input.file_last_modified.or(input.indexed_timestamp),
            StalenessMode::Remote => input.indexed_timestamp.or(input.file_last_modified),
        }
    }

    /// Looks up `path`'s current mtime under `project_root`, UTC seconds.
    /// Cached per `(path, ttl)`; a cache hit bumps the read hit-count
    /// exposed for tests via `cache_hit_count`.
    fn current_mtime(&self, project_root: &Path, file_path: &str) -> Option<f64> {
        let mut guard = self.cache.lock().expect("staleness cache mutex poisoned");
        if let Some((mtime, stamped)) = guard.entries.get(file_path) {
            if stamped.elapsed() < guard.ttl {
                guard.hits += 1;
                return Some(*mtime);
            }
        }
        drop(guard);

        let mtime = std::fs::metadata(project_root.join(file_path))
            .ok()?
            .modified()
            .ok()?
            .duration_since(std::time::UNIX_EPOCH)
            .ok()?
            .as_secs_f64();

        let mut guard = self.cache.lock().expect("staleness cache mutex poisoned");
        guard.entries.put(file_path.to_string(), (mtime, Instant::now()));
        Some(mtime)
    }

    pub fn cache_hit_count(&self) -> u64 {
        self.cache.lock().expect("staleness cache mutex poisoned").hits
    }

    /// Classifies one result. `delta = local_file_mtime - index_timestamp`;
    /// `is_stale` iff `delta > threshold`. Tiers are assigned purely from
    /// the magnitude of a *stale* delta — a non-stale result is always
    /// `Fresh` regardless of how small a negative/zero delta is.
    pub fn classify(&self, project_root: &Path, input: &StalenessInput) -> StalenessIndicator {
        let index_ts = self.index_timestamp(input);
        let current_mtime = self.current_mtime(project_root, &input.file_path);

        let (Some(index_ts), Some(current_mtime)) = (index_ts, current_mtime) else {
            return StalenessIndicator {
                tier: StalenessTier::Fresh,
                is_stale: false,
                delta_seconds: 0.0,
            };
        };

        let delta = current_mtime - index_ts;
        let is_stale = delta > self.threshold_seconds;
        let tier = if !is_stale {
            StalenessTier::Fresh
        } else if delta < 3600.0 {
            StalenessTier::Minor
        } else if delta < 86_400.0 {
            StalenessTier::Moderate
        } else {
            StalenessTier::Major
        };

        StalenessIndicator {
            tier,
            is_stale,
            delta_seconds: delta,
        }
    }

    /// Sorts `(input, indicator)` pairs per the public contract: fresh
    /// results first, then by similarity score descending within each
    /// freshness group. This is NOT the same ordering as pure score-sort.
    pub fn sort_by_freshness_then_score<T>(&self, mut items: Vec<(T, StalenessIndicator)>) -> Vec<(T, StalenessIndicator)>
    where
        T: AsScore,
    {
        items.sort_by(|a, b| {
            a.1.is_stale
                .cmp(&b.1.is_stale)
                .then_with(|| b.0.score().partial_cmp(&a.0.score()).unwrap_or(std::cmp::Ordering::Equal))
        });
        items
    }
}

/// Lets `sort_by_freshness_then_score` stay generic over whatever result
/// type a caller wraps `StalenessIndicator` around.
pub trait AsScore {
    fn score(&self) -> f32;
}

impl AsScore for StalenessInput {
    fn score(&self) -> f32 {
        self.score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn detector(mode: StalenessMode, threshold: f64) -> StalenessDetector {
        StalenessDetector::new(mode, threshold, 64, Duration::from_secs(60))
    }

    fn touch(dir: &TempDir, name: &str) -> String {
        std::fs::write(dir.path().join(name), "content").unwrap();
        name.to_string()
    }

    #[test]
    fn local_mode_prefers_file_last_modified() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.rs");
        let d = detector(StalenessMode::Local, 5.0);
        let input = StalenessInput {
            file_path: path,
            file_last_modified: Some(1.0),
            indexed_timestamp: Some(999_999_999.0),
            score: 0.5,
        };
        // Using file_last_modified=1.0 as the index timestamp means the
        // current on-disk mtime (now) looks enormously stale.
        let indicator = d.classify(dir.path(), &input);
        assert!(indicator.is_stale);
    }

    #[test]
    fn remote_mode_prefers_indexed_timestamp() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.rs");
        let now = std::fs::metadata(dir.path().join("a.rs"))
            .unwrap()
            .modified()
            .unwrap()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs_f64();

        let d = detector(StalenessMode::Remote, 5.0);
        let input = StalenessInput {
            file_path: path,
            file_last_modified: Some(1.0),
            indexed_timestamp: Some(now),
            score: 0.5,
        };
        let indicator = d.classify(dir.path(), &input);
        assert!(!indicator.is_stale);
    }

    #[test]
    fn fresh_result_has_zero_or_negative_delta_and_fresh_tier() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.rs");
        let far_future = 9_999_999_999.0;
        let d = detector(StalenessMode::Local, 5.0);
        let input = StalenessInput {
            file_path: path,
            file_last_modified: Some(far_future),
            indexed_timestamp: None,
            score: 0.5,
        };
        let indicator = d.classify(dir.path(), &input);
        assert!(!indicator.is_stale);
        assert_eq!(indicator.tier, StalenessTier::Fresh);
    }

    #[test]
    fn stale_by_one_hour_is_minor_tier_with_label() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.rs");
        let d = detector(StalenessMode::Local, 0.0);
        let current_mtime = d.current_mtime(dir.path(), &path).unwrap();
        let input = StalenessInput {
            file_path: path,
            file_last_modified: Some(current_mtime - 1800.0),
            indexed_timestamp: None,
            score: 0.5,
        };
        let indicator = d.classify(dir.path(), &input);
        assert!(indicator.is_stale);
        assert_eq!(indicator.tier, StalenessTier::Minor);
        assert!(indicator.label().ends_with("m stale"));
    }

    #[test]
    fn sort_places_fresh_before_stale_regardless_of_score() {
        let dir = TempDir::new().unwrap();
        let fresh_path = touch(&dir, "fresh.rs");
        let stale_path = touch(&dir, "stale.rs");
        let d = detector(StalenessMode::Local, 0.0);

        let fresh = StalenessInput {
            file_path: fresh_path,
            file_last_modified: Some(9_999_999_999.0),
            indexed_timestamp: None,
            score: 0.85,
        };
        let stale_mtime = d.current_mtime(dir.path(), &stale_path).unwrap();
        let stale = StalenessInput {
            file_path: stale_path,
            file_last_modified: Some(stale_mtime - 3600.0),
            indexed_timestamp: None,
            score: 0.95,
        };

        let fresh_indicator = d.classify(dir.path(), &fresh);
        let stale_indicator = d.classify(dir.path(), &stale);
        let sorted = d.sort_by_freshness_then_score(vec![(fresh.clone(), fresh_indicator), (stale.clone(), stale_indicator)]);

        assert_eq!(sorted[0].0.file_path, fresh.file_path);
        assert_eq!(sorted[1].0.file_path, stale.file_path);
    }

    #[test]
    fn cache_hit_count_increments_on_repeated_lookup() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.rs");
        let d = detector(StalenessMode::Local, 0.0);
        let input = StalenessInput {
            file_path: path,
            file_last_modified: Some(1.0),
            indexed_timestamp: None,
            score: 0.1,
        };
        d.classify(dir.path(), &input);
        d.classify(dir.path(), &input);
        assert!(d.cache_hit_count() >= 1);
    }

    #[test]
    fn missing_timestamps_default_to_fresh_rather_than_panicking() {
        let dir = TempDir::new().unwrap();
        let path = touch(&dir, "a.rs");
        let d = detector(StalenessMode::Local, 5.0);
        let input = StalenessInput {
            file_path: path,
            file_last_modified: None,
            indexed_timestamp: None,
            score: 0.1,
        };
        let indicator = d.classify(dir.path(), &input);
        assert!(!indicator.is_stale);
    }
}
