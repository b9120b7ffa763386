//! QueryEngine (C10): turns a text query into a ranked, freshness-aware
//! result set, orchestrating the embedding provider, the vector store's
//! ANN search, payload filtering, and the StalenessDetector.
//!
//! Grounded on the graceful-degradation shape of this corpus's
//! `search/hybrid.rs::HybridSearcher::search`: a failing sub-step never
//! panics the whole query, it logs via `tracing::warn!` and degrades
//! (here: a missing temporal index degrades to current-code results plus
//! a `warning` string, rather than an error).

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;

use crate::config::StalenessConfig;
use crate::embeddings::provider::EmbeddingProvider;
use crate::error::EngineError;
use crate::error::Result;
use crate::query::staleness::AsScore;
use crate::query::staleness::StalenessDetector;
use crate::query::staleness::StalenessIndicator;
use crate::storage::vector_store::FilesystemVectorStore;
use crate::types::Filter;
use crate::types::Payload;
use crate::types::PointId;

/// Optional temporal extensions to a query. This crate carries no
/// temporal (per-commit) index, so any request that asks for one always
/// degrades to current-code results with a populated `warning` field
/// rather than erroring, per the §4.10 contract — requests are only
/// rejected for being malformed, never for naming a feature we lack.
#[derive(Debug, Clone, Default)]
pub struct TemporalParams {
    pub time_range: Option<String>,
    pub at_commit: Option<String>,
    pub include_removed: bool,
    pub show_evolution: bool,
    pub evolution_limit: Option<usize>,
}

impl TemporalParams {
    fn is_empty(&self) -> bool {
        self.time_range.is_none()
            && self.at_commit.is_none()
            && !self.include_removed
            && !self.show_evolution
            && self.evolution_limit.is_none()
    }

    /// Validates `time_range` (`"<start>..<end>"`, both `YYYY-MM-DD`,
    /// zero-padded, start <= end). Other fields have no further shape to
    /// validate beyond their types.
    fn validate(&self) -> Result<()> {
        if let Some(range) = &self.time_range {
            let (start, end) = range.split_once("..").ok_or_else(|| EngineError::InvalidQueryParameters {
                reason: format!("time_range `{range}` must be `<start>..<end>`"),
            })?;
            let start_date = parse_zero_padded_date(start)?;
            let end_date = parse_zero_padded_date(end)?;
            if end_date < start_date {
                return Err(EngineError::InvalidQueryParameters {
                    reason: format!("time_range end `{end}` is before start `{start}`"),
                });
            }
        }
        if let Some(limit) = self.evolution_limit {
            if limit == 0 {
                return Err(EngineError::InvalidQueryParameters {
                    reason: "evolution_limit must be greater than zero".to_string(),
                });
            }
        }
        Ok(())
    }
}

fn parse_zero_padded_date(s: &str) -> Result<NaiveDate> {
    let parts: Vec<&str> = s.split('-').collect();
    let malformed = || EngineError::InvalidQueryParameters {
        reason: format!("`{s}` is not a zero-padded YYYY-MM-DD date"),
    };
    if parts.len() != 3 || parts[0].len() != 4 || parts[1].len() != 2 || parts[2].len() != 2 {
        return Err(malformed());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| malformed())
}

#[derive(Debug, Clone)]
pub struct QueryRequest {
    pub text: String,
    pub filter: Option<Filter>,
    pub k: usize,
    pub temporal: Option<TemporalParams>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>, k: usize) -> Self {
        Self {
            text: text.into(),
            filter: None,
            k,
            temporal: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EnhancedResult {
    pub id: PointId,
    pub score: f32,
    pub payload: Payload,
    pub staleness: StalenessIndicator,
    pub warning: Option<String>,
}

impl AsScore for EnhancedResult {
    fn score(&self) -> f32 {
        self.score
    }
}

pub struct QueryEngine {
    store: Arc<FilesystemVectorStore>,
    provider: Arc<dyn EmbeddingProvider>,
    staleness: StalenessDetector,
    collection: String,
    project_root: PathBuf,
}

impl QueryEngine {
    pub fn new(
        store: Arc<FilesystemVectorStore>,
        provider: Arc<dyn EmbeddingProvider>,
        staleness_config: &StalenessConfig,
        collection: impl Into<String>,
        project_root: impl Into<PathBuf>,
    ) -> Self {
        let staleness = StalenessDetector::new(
            staleness_config.mode,
            staleness_config.staleness_threshold_seconds,
            staleness_config.cache_capacity,
            std::time::Duration::from_secs(60),
        );
        Self {
            store,
            provider,
            staleness,
            collection: collection.into(),
            project_root: project_root.into(),
        }
    }

    pub async fn query(&self, request: QueryRequest) -> Result<Vec<EnhancedResult>> {
        if request.k == 0 {
            return Err(EngineError::InvalidQueryParameters {
                reason: "k must be greater than zero".to_string(),
            });
        }
        let warning = match &request.temporal {
            Some(temporal) if !temporal.is_empty() => {
                temporal.validate()?;
                tracing::warn!("temporal query requested but no temporal index is present; returning current-code results");
                Some("no temporal index present; results reflect current code only".to_string())
            }
            _ => None,
        };

        let vectors = self.provider.embed_batch(std::slice::from_ref(&request.text)).await?;
        let vector = vectors.into_iter().next().ok_or_else(|| EngineError::EmbeddingFailed {
            cause: "provider returned no vector for the query text".to_string(),
        })?;

        let hits = self.store.search(&self.collection, &vector, request.k, request.filter.as_ref())?;

        let mut scored = Vec::with_capacity(hits.len());
        for (id, distance) in hits {
            let record = match self.store.get_point(&self.collection, &id) {
                Ok(record) => record,
                Err(_) => continue, // missing ChunkRecord: dropped, consistent with C5 search
            };
            let input = crate::query::staleness::StalenessInput {
                file_path: record.payload.file_path.clone(),
                file_last_modified: record.payload.file_last_modified,
                indexed_timestamp: Some(record.payload.indexed_timestamp),
                score: 1.0 - distance,
            };
            let indicator = self.staleness.classify(&self.project_root, &input);
            scored.push((
                EnhancedResult {
                    id,
                    score: input.score,
                    payload: record.payload,
                    staleness: indicator,
                    warning: warning.clone(),
                },
                indicator,
            ));
        }

        let sorted = self.staleness.sort_by_freshness_then_score(scored);
        Ok(sorted.into_iter().map(|(result, _)| result).collect())
    }
}
