//! Core data model: Chunk, ChunkRecord, PointID, payload fields, and the
//! small closed enums that give the on-disk JSON real Rust types.

use std::collections::BTreeSet;

use serde::Deserialize;
use serde::Serialize;

/// Opaque identifier of a ChunkRecord, unique within a collection.
///
/// Short (UUID-v4-derived) so that the two-level hex shard directories
/// stay small; `PointId::new` is the only constructor so callers can't
/// accidentally mint a non-hex id that would break shard derivation.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PointId(pub String);

impl PointId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    /// Two-level hex shard prefix, e.g. `("ab", "cd")` for a point id
    /// starting `abcd…`. The mapping is a pure function of the id, per
    /// the "PointID → path is a pure function" requirement.
    pub fn shard(&self) -> (String, String) {
        let bytes = self.0.as_bytes();
        let aa = std::str::from_utf8(&bytes[0..2.min(bytes.len())])
            .unwrap_or("00")
            .to_string();
        let bb = if bytes.len() >= 4 {
            std::str::from_utf8(&bytes[2..4]).unwrap_or("00").to_string()
        } else {
            "00".to_string()
        };
        (aa, bb)
    }
}

impl Default for PointId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PointId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A fixed-size, line-bounded slice of a file's text, produced by the
/// chunker and consumed by the per-file ingestion pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub text: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub line_start: u32,
    pub line_end: u32,
    pub file_extension: String,
}

/// Closed set of languages tagged on a ChunkRecord for filtering. Unknown
/// extensions map to `Plain` rather than failing ingestion — language
/// tagging is informational, never load-bearing for chunking itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Rust,
    Python,
    Go,
    JavaScript,
    TypeScript,
    Java,
    C,
    Cpp,
    Markdown,
    Json,
    Toml,
    Yaml,
    Shell,
    Plain,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "rs" => Self::Rust,
            "py" | "pyi" => Self::Python,
            "go" => Self::Go,
            "js" | "mjs" | "cjs" | "jsx" => Self::JavaScript,
            "ts" | "tsx" => Self::TypeScript,
            "java" => Self::Java,
            "c" | "h" => Self::C,
            "cc" | "cpp" | "cxx" | "hpp" => Self::Cpp,
            "md" | "markdown" => Self::Markdown,
            "json" => Self::Json,
            "toml" => Self::Toml,
            "yaml" | "yml" => Self::Yaml,
            "sh" | "bash" | "zsh" => Self::Shell,
            _ => Self::Plain,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rust => "rust",
            Self::Python => "python",
            Self::Go => "go",
            Self::JavaScript => "javascript",
            Self::TypeScript => "typescript",
            Self::Java => "java",
            Self::C => "c",
            Self::Cpp => "cpp",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Toml => "toml",
            Self::Yaml => "yaml",
            Self::Shell => "shell",
            Self::Plain => "plain",
        }
    }
}

/// A typed payload value. On-disk payloads are heterogeneous JSON; this
/// sum type gives a filter clause's target field a shape to match on
/// instead of comparing raw `serde_json::Value`s, per the design note on
/// dynamic typing. `scroll_points`/`search` filter matching (in
/// `storage::vector_store`) is built on this type. `Keyword` is an exact-match
/// field (e.g. `type`, `git_branch`); `Text` is free-form content a
/// substring search runs over; `Integer` and `Array` are self-explanatory.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PayloadValue {
    Keyword(String),
    Text(String),
    Integer(i64),
    Array(Vec<String>),
}

impl PayloadValue {
    /// Exact-match comparison against a filter's target value.
    pub fn matches_exact(&self, value: &str) -> bool {
        match self {
            Self::Keyword(s) | Self::Text(s) => s == value,
            Self::Integer(i) => i.to_string() == value,
            Self::Array(items) => items.iter().any(|item| item == value),
        }
    }

    /// Substring match, used by `FilterClause::MatchText`.
    pub fn contains_substring(&self, needle: &str) -> bool {
        match self {
            Self::Keyword(s) | Self::Text(s) => s.contains(needle),
            Self::Integer(i) => i.to_string().contains(needle),
            Self::Array(items) => items.iter().any(|item| item.contains(needle)),
        }
    }

    /// Set-membership match, used by `FilterClause::AnyOf`.
    pub fn matches_any(&self, values: &[String]) -> bool {
        match self {
            Self::Keyword(s) | Self::Text(s) => values.iter().any(|v| v == s),
            Self::Integer(i) => values.iter().any(|v| v == &i.to_string()),
            Self::Array(items) => items.iter().any(|item| values.contains(item)),
        }
    }
}

/// The five fields the FilesystemVectorStore maintains secondary indexes
/// over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum IndexedField {
    Type,
    Path,
    GitBranch,
    FileMtime,
    HiddenBranches,
}

impl IndexedField {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Type => "type",
            Self::Path => "path",
            Self::GitBranch => "git_branch",
            Self::FileMtime => "file_mtime",
            Self::HiddenBranches => "hidden_branches",
        }
    }

    pub const ALL: [IndexedField; 5] = [
        Self::Type,
        Self::Path,
        Self::GitBranch,
        Self::FileMtime,
        Self::HiddenBranches,
    ];
}

/// Queryable fields attached to a ChunkRecord.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payload {
    pub project_id: String,
    pub file_path: String,
    pub file_hash: String,
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub line_start: u32,
    pub line_end: u32,
    pub file_extension: String,
    pub file_last_modified: Option<f64>,
    pub indexed_timestamp: f64,
    #[serde(rename = "type")]
    pub kind: ContentType,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_commit_hash: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_branch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub git_hash: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub hidden_branches: BTreeSet<String>,
    /// Unknown fields are preserved verbatim on round-trip rather than
    /// dropped, per the untyped-payload design note.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Content,
    Metadata,
}

/// The persisted JSON document pairing a chunk's embedding vector with its
/// payload. One file per ChunkRecord under `vectors/<aa>/<bb>/<id>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub id: PointId,
    pub vector: Vec<f32>,
    pub payload: Payload,
}

/// Metadata for a filter lookup against `scroll_points`/`search`.
#[derive(Debug, Clone, Default)]
pub struct Filter {
    pub must: Vec<FilterClause>,
}

#[derive(Debug, Clone)]
pub enum FilterClause {
    MatchValue { field: String, value: String },
    MatchText { field: String, substring: String },
    RangeGte { field: String, value: f64 },
    RangeLte { field: String, value: f64 },
    AnyOf { field: String, values: Vec<String> },
}

/// `{vector_dim, model, created_at}` — the collection-level metadata file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub vector_dim: usize,
    pub model: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn language_from_extension_unknown_is_plain() {
        assert_eq!(Language::from_extension("xyz"), Language::Plain);
        assert_eq!(Language::from_extension("RS"), Language::Rust);
    }

    #[test]
    fn point_id_shard_is_pure_function_of_id() {
        let id = PointId("abcd1234".to_string());
        assert_eq!(id.shard(), ("ab".to_string(), "cd".to_string()));
        // Calling again yields the identical shard — no hidden state.
        assert_eq!(id.shard(), ("ab".to_string(), "cd".to_string()));
    }

    #[test]
    fn short_point_id_still_shards() {
        let id = PointId("a".to_string());
        assert_eq!(id.shard(), ("a".to_string(), "00".to_string()));
    }

    #[test]
    fn payload_value_exact_and_substring_match() {
        let keyword = PayloadValue::Keyword("main".to_string());
        assert!(keyword.matches_exact("main"));
        assert!(!keyword.matches_exact("mai"));

        let text = PayloadValue::Text("fn authenticate_user() {}".to_string());
        assert!(text.contains_substring("authenticate"));
        assert!(!text.contains_substring("render"));
    }

    #[test]
    fn payload_value_array_matches_any_member() {
        let array = PayloadValue::Array(vec!["develop".to_string(), "staging".to_string()]);
        assert!(array.matches_any(&["staging".to_string(), "prod".to_string()]));
        assert!(!array.matches_any(&["prod".to_string()]));
    }
}
