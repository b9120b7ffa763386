//! ConfigStore (C11): typed configuration tree for the engine — chunking,
//! indexing, embedding, daemon, and staleness settings — with a
//! project → global → built-in-default cascade, socket path derivation,
//! and validation that reports warnings rather than failing hard.

use serde::Deserialize;
use serde::Serialize;
use std::path::Path;
use std::path::PathBuf;

use sha2::Digest;
use sha2::Sha256;

/// Root configuration tree for one project's index.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    #[serde(default)]
    pub chunking: ChunkingConfig,

    #[serde(default)]
    pub indexing: IndexingConfig,

    #[serde(default)]
    pub embedding: Option<EmbeddingConfig>,

    #[serde(default)]
    pub daemon: DaemonConfig,

    #[serde(default)]
    pub staleness: StalenessConfig,

    /// Legacy field: older config files wrote an explicit socket path here.
    /// It is read (so `toml::from_str` does not reject the file) and then
    /// discarded — the socket path is always re-derived from the project
    /// root, never trusted from disk.
    #[serde(default, rename = "socket_path")]
    _legacy_socket_path: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            data_dir: default_data_dir(),
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            embedding: None,
            daemon: DaemonConfig::default(),
            staleness: StalenessConfig::default(),
            _legacy_socket_path: None,
        }
    }
}

fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".code-indexer")
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkingConfig {
    #[serde(default = "default_max_chunk_size")]
    pub max_chunk_size: usize,
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chunk_size: default_max_chunk_size(),
            chunk_overlap: default_chunk_overlap(),
        }
    }
}

fn default_max_chunk_size() -> usize {
    crate::chunking::DEFAULT_CHUNK_SIZE
}
fn default_chunk_overlap() -> usize {
    crate::chunking::DEFAULT_CHUNK_OVERLAP
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexingConfig {
    #[serde(default = "default_max_file_size_mb")]
    pub max_file_size_mb: i32,
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    #[serde(default = "default_slot_capacity")]
    pub slot_capacity: usize,
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
    #[serde(default = "default_orphan_cleanup_age_secs")]
    pub orphan_cleanup_age_secs: u64,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            max_file_size_mb: default_max_file_size_mb(),
            max_workers: default_max_workers(),
            slot_capacity: default_slot_capacity(),
            lock_timeout_secs: default_lock_timeout_secs(),
            orphan_cleanup_age_secs: default_orphan_cleanup_age_secs(),
        }
    }
}

fn default_max_file_size_mb() -> i32 {
    5
}
fn default_max_workers() -> usize {
    4
}
fn default_slot_capacity() -> usize {
    crate::slot::DEFAULT_SLOT_COUNT
}
fn default_lock_timeout_secs() -> u64 {
    30
}
fn default_orphan_cleanup_age_secs() -> u64 {
    3600
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingConfig {
    pub provider: String,
    pub model: String,
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default = "default_max_tokens_per_batch")]
    pub max_tokens_per_batch: usize,
}

fn default_embedding_dimension() -> usize {
    1536
}
fn default_max_tokens_per_batch() -> usize {
    8192
}

/// Daemon settings. `ttl_minutes` is validated to `[1, 10080]` (one week)
/// by `EngineConfig::validate`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DaemonConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_ttl_minutes")]
    pub ttl_minutes: u32,
    #[serde(default = "default_true")]
    pub auto_shutdown_on_idle: bool,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delays_ms")]
    pub retry_delays_ms: Vec<u64>,
    #[serde(default = "default_eviction_check_interval_seconds")]
    pub eviction_check_interval_seconds: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_minutes: default_ttl_minutes(),
            auto_shutdown_on_idle: true,
            max_retries: default_max_retries(),
            retry_delays_ms: default_retry_delays_ms(),
            eviction_check_interval_seconds: default_eviction_check_interval_seconds(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_ttl_minutes() -> u32 {
    10
}
fn default_max_retries() -> u32 {
    4
}
fn default_retry_delays_ms() -> Vec<u64> {
    vec![100, 500, 1000, 2000]
}
fn default_eviction_check_interval_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StalenessMode {
    Local,
    Remote,
}

impl Default for StalenessMode {
    fn default() -> Self {
        Self::Local
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StalenessConfig {
    #[serde(default)]
    pub mode: StalenessMode,
    #[serde(default = "default_staleness_threshold_seconds")]
    pub staleness_threshold_seconds: f64,
    #[serde(default = "default_staleness_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for StalenessConfig {
    fn default() -> Self {
        Self {
            mode: StalenessMode::default(),
            staleness_threshold_seconds: default_staleness_threshold_seconds(),
            cache_capacity: default_staleness_cache_capacity(),
        }
    }
}

fn default_staleness_threshold_seconds() -> f64 {
    5.0
}
fn default_staleness_cache_capacity() -> usize {
    1024
}

/// Maximum total byte length of a Unix domain socket path on most
/// platforms (`sizeof(sockaddr_un.sun_path)` is commonly 108).
const MAX_SOCKET_PATH_BYTES: usize = 108;

impl EngineConfig {
    /// Loads configuration from files.
    ///
    /// Search order (first found wins):
    /// 1. `{project_root}/.code-indexer/config.toml` (project-level)
    /// 2. `~/.code-indexer/config.toml` (global)
    /// 3. built-in default (disabled)
    pub fn load(project_root: &Path) -> crate::error::Result<Self> {
        let project_config = project_root.join(".code-indexer").join("config.toml");
        if project_config.exists() {
            return Self::from_file(&project_config);
        }

        if let Some(home) = dirs::home_dir() {
            let global_config = home.join(".code-indexer").join("config.toml");
            if global_config.exists() {
                return Self::from_file(&global_config);
            }
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> crate::error::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content).map_err(|e| crate::error::EngineError::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })
    }

    pub fn save(&self, path: &Path) -> crate::error::Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| crate::error::EngineError::ConfigParseError {
            path: path.to_path_buf(),
            cause: e.to_string(),
        })?;
        crate::storage::atomic::write_atomic(path, content.as_bytes())
    }

    /// Derives the daemon's control socket path from the project root: a
    /// 16-hex-char digest of the canonicalized root under a shared
    /// `cidx/` directory in the platform temp dir. Deterministic so every
    /// process for the same project agrees on the path without a
    /// discovery step.
    pub fn derive_socket_path(project_root: &Path) -> PathBuf {
        let canonical = project_root
            .canonicalize()
            .unwrap_or_else(|_| project_root.to_path_buf());
        let mut hasher = Sha256::new();
        hasher.update(canonical.to_string_lossy().as_bytes());
        let digest = hasher.finalize();
        let hash16 = hex::encode(&digest[..8]);

        std::env::temp_dir().join("cidx").join(format!("{hash16}.sock"))
    }

    /// Validates the config and the derived socket path, returning
    /// human-readable warnings rather than failing — callers decide
    /// whether any of these are fatal for their context.
    pub fn validate(&self, project_root: &Path) -> Vec<ConfigWarning> {
        let mut warnings = Vec::new();

        if !(1..=10_080).contains(&self.daemon.ttl_minutes) {
            warnings.push(ConfigWarning::InvalidValue {
                field: "daemon.ttl_minutes",
                reason: format!("must be within [1, 10080], got {}", self.daemon.ttl_minutes),
            });
        }

        let socket_path = Self::derive_socket_path(project_root);
        let socket_len = socket_path.to_string_lossy().as_bytes().len();
        if socket_len > MAX_SOCKET_PATH_BYTES {
            warnings.push(ConfigWarning::InvalidValue {
                field: "daemon.socket_path",
                reason: format!("derived socket path is {socket_len} bytes, exceeds platform limit of {MAX_SOCKET_PATH_BYTES}"),
            });
        }

        if self.chunking.max_chunk_size == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "chunking.max_chunk_size",
                reason: "must be > 0".to_string(),
            });
        }
        if self.chunking.chunk_overlap >= self.chunking.max_chunk_size {
            warnings.push(ConfigWarning::InvalidValue {
                field: "chunking.chunk_overlap",
                reason: format!(
                    "must be < max_chunk_size ({}), got {}",
                    self.chunking.max_chunk_size, self.chunking.chunk_overlap
                ),
            });
        }
        if self.indexing.max_workers == 0 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "indexing.max_workers",
                reason: "must be > 0".to_string(),
            });
        }
        if let Some(embedding) = &self.embedding {
            if embedding.dimension == 0 {
                warnings.push(ConfigWarning::InvalidValue {
                    field: "embedding.dimension",
                    reason: "must be > 0".to_string(),
                });
            }
        } else {
            warnings.push(ConfigWarning::MissingDependency {
                feature: "vector search",
                required: "embedding",
            });
        }

        warnings
    }
}

#[derive(Debug, Clone)]
pub enum ConfigWarning {
    MissingDependency {
        feature: &'static str,
        required: &'static str,
    },
    PathNotExists {
        field: &'static str,
        path: PathBuf,
    },
    InvalidValue {
        field: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::MissingDependency { feature, required } => {
                write!(f, "feature '{feature}' requires '{required}' to be configured")
            }
            ConfigWarning::PathNotExists { field, path } => {
                write!(f, "config '{field}' path does not exist: {path:?}")
            }
            ConfigWarning::InvalidValue { field, reason } => {
                write!(f, "invalid value for '{field}': {reason}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn default_config_has_zero_daemon_ttl_violations() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::default();
        let warnings = config.validate(dir.path());
        assert!(!warnings.iter().any(|w| matches!(w, ConfigWarning::InvalidValue { field: "daemon.ttl_minutes", .. })));
    }

    #[test]
    fn ttl_minutes_out_of_range_is_flagged() {
        let dir = TempDir::new().unwrap();
        let mut config = EngineConfig::default();
        config.daemon.ttl_minutes = 0;
        let warnings = config.validate(dir.path());
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::InvalidValue { field: "daemon.ttl_minutes", .. })));

        config.daemon.ttl_minutes = 20_000;
        let warnings = config.validate(dir.path());
        assert!(warnings.iter().any(|w| matches!(w, ConfigWarning::InvalidValue { field: "daemon.ttl_minutes", .. })));
    }

    #[test]
    fn derived_socket_path_is_deterministic_and_short() {
        let dir = TempDir::new().unwrap();
        let a = EngineConfig::derive_socket_path(dir.path());
        let b = EngineConfig::derive_socket_path(dir.path());
        assert_eq!(a, b);
        assert!(a.to_string_lossy().as_bytes().len() <= MAX_SOCKET_PATH_BYTES);
        assert!(a.extension().map(|e| e == "sock").unwrap_or(false));
    }

    #[test]
    fn different_projects_derive_different_socket_paths() {
        let a = TempDir::new().unwrap();
        let b = TempDir::new().unwrap();
        assert_ne!(
            EngineConfig::derive_socket_path(a.path()),
            EngineConfig::derive_socket_path(b.path())
        );
    }

    #[test]
    fn legacy_socket_path_field_is_ignored_on_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "socket_path = \"/tmp/old/legacy.sock\"\n").unwrap();
        let config = EngineConfig::from_file(&path).unwrap();
        let derived = EngineConfig::derive_socket_path(dir.path());
        assert_ne!(derived, PathBuf::from("/tmp/old/legacy.sock"));
        assert!(!config.enabled);
    }

    #[test]
    fn round_trip_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = EngineConfig::default();
        config.daemon.ttl_minutes = 42;
        config.save(&path).unwrap();

        let loaded = EngineConfig::from_file(&path).unwrap();
        assert_eq!(loaded.daemon.ttl_minutes, 42);
    }
}
