//! The embedding provider collaborator interface.
//!
//! The provider itself is an external collaborator (treated as a black box
//! that turns text into vectors); this crate only defines the seam it is
//! consumed through.

use async_trait::async_trait;

use crate::error::Result;

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Vector dimension this provider produces. C5 validates every
    /// upserted vector's length against the collection's declared
    /// `vector_dim`, which is seeded from this value at `create_collection`.
    fn dimension(&self) -> usize;

    /// A stable tag identifying the model in use, persisted into
    /// `collection_meta.json`.
    fn model(&self) -> &str;

    /// Maximum number of input tokens the provider accepts per batch call.
    /// `VectorCalculationManager` uses this to decide when to split a
    /// submitted batch.
    fn max_tokens_per_batch(&self) -> usize;

    /// Embed a batch of texts, returning one vector per input in the same
    /// order. A provider error here is surfaced as `EngineError::
    /// EmbeddingFailed`; no retries happen at this layer.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}
