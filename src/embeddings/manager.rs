//! VectorCalculationManager (C2): a bounded worker pool that batches chunks
//! and invokes the embedding provider, staying under its declared token
//! limit.

use std::sync::Arc;

use tiktoken_rs::CoreBPE;
use tiktoken_rs::cl100k_base;
use tokio::sync::Semaphore;

use crate::embeddings::provider::EmbeddingProvider;
use crate::error::Result;

/// Outcome of a single submitted batch. Provider errors surface here
/// rather than as a propagated `Err` from `submit_batch_task` itself, so
/// the ingestion driver can record the owning file as `failed` and move
/// on — no retries happen at this layer.
#[derive(Debug, Clone)]
pub enum BatchResult {
    Ok { embeddings: Vec<Vec<f32>> },
    Err { error: String },
}

/// Bounded worker pool over an `EmbeddingProvider`. `max_workers` limits
/// how many batch calls are in flight concurrently; submissions return
/// immediately and resolve when the provider responds.
pub struct VectorCalculationManager {
    provider: Arc<dyn EmbeddingProvider>,
    semaphore: Arc<Semaphore>,
    bpe: Arc<CoreBPE>,
}

impl VectorCalculationManager {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, max_workers: usize) -> Self {
        Self {
            provider,
            semaphore: Arc::new(Semaphore::new(max_workers.max(1))),
            bpe: Arc::new(cl100k_base().expect("cl100k_base tokenizer ships with tiktoken-rs")),
        }
    }

    /// Submit a batch of texts for embedding. Internally splits `texts`
    /// into provider-sized sub-batches (respecting `max_tokens_per_batch`)
    /// and issues them sequentially within one bounded worker slot, then
    /// concatenates results back into the caller's original order.
    pub async fn submit_batch_task(&self, texts: Vec<String>) -> BatchResult {
        if texts.is_empty() {
            return BatchResult::Ok {
                embeddings: Vec::new(),
            };
        }

        let _permit = match self.semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => {
                return BatchResult::Err {
                    error: "worker pool is shutting down".to_string(),
                };
            }
        };

        let sub_batches = self.split_by_token_budget(&texts);
        let mut embeddings = Vec::with_capacity(texts.len());

        for sub_batch in sub_batches {
            match self.provider.embed_batch(&sub_batch).await {
                Ok(mut vectors) => embeddings.append(&mut vectors),
                Err(e) => {
                    return BatchResult::Err {
                        error: e.to_string(),
                    };
                }
            }
        }

        BatchResult::Ok { embeddings }
    }

    /// Greedily groups `texts` into sub-batches that each stay under
    /// `provider.max_tokens_per_batch()`. A single oversized text still
    /// gets its own sub-batch — the provider, not this layer, decides
    /// whether to reject it.
    fn split_by_token_budget(&self, texts: &[String]) -> Vec<Vec<String>> {
        let budget = self.provider.max_tokens_per_batch();
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut current_tokens = 0usize;

        for text in texts {
            let tokens = self.bpe.encode_with_special_tokens(text).len();
            if !current.is_empty() && current_tokens + tokens > budget {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current_tokens += tokens;
            current.push(text.clone());
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    pub fn provider_model(&self) -> &str {
        self.provider.model()
    }

    pub fn provider_dimension(&self) -> usize {
        self.provider.dimension()
    }
}

/// A no-op provider used by tests and by callers that want a working
/// ingestion pipeline without a real embedding backend (deterministic
/// vectors derived from text length, not semantically meaningful).
pub struct DeterministicTestProvider {
    pub dim: usize,
}

#[async_trait::async_trait]
impl EmbeddingProvider for DeterministicTestProvider {
    fn dimension(&self) -> usize {
        self.dim
    }

    fn model(&self) -> &str {
        "deterministic-test"
    }

    fn max_tokens_per_batch(&self) -> usize {
        8192
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let seed = t.len() as f32 + 1.0;
                (0..self.dim).map(|i| (i as f32 + seed).sin()).collect()
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(max_workers: usize) -> VectorCalculationManager {
        let provider = Arc::new(DeterministicTestProvider { dim: 8 });
        VectorCalculationManager::new(provider, max_workers)
    }

    #[tokio::test]
    async fn empty_batch_returns_empty_ok() {
        let m = manager(4);
        match m.submit_batch_task(vec![]).await {
            BatchResult::Ok { embeddings } => assert!(embeddings.is_empty()),
            BatchResult::Err { error } => panic!("unexpected error: {error}"),
        }
    }

    #[tokio::test]
    async fn batch_preserves_order_and_dimension() {
        let m = manager(4);
        let texts = vec!["alpha".to_string(), "beta".to_string(), "gamma".to_string()];
        match m.submit_batch_task(texts).await {
            BatchResult::Ok { embeddings } => {
                assert_eq!(embeddings.len(), 3);
                for v in &embeddings {
                    assert_eq!(v.len(), 8);
                }
            }
            BatchResult::Err { error } => panic!("unexpected error: {error}"),
        }
    }

    #[tokio::test]
    async fn pool_bounds_concurrent_batches() {
        let m = Arc::new(manager(1));
        let texts_a = vec!["a".repeat(10)];
        let texts_b = vec!["b".repeat(10)];
        let (ra, rb) = tokio::join!(
            m.submit_batch_task(texts_a),
            m.submit_batch_task(texts_b)
        );
        assert!(matches!(ra, BatchResult::Ok { .. }));
        assert!(matches!(rb, BatchResult::Ok { .. }));
    }
}
