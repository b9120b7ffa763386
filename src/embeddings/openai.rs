//! OpenAI embeddings provider — the bundled default implementation of
//! `EmbeddingProvider`.

use async_trait::async_trait;
use serde::Deserialize;
use serde::Serialize;

use crate::error::EngineError;
use crate::error::Result;

use super::provider::EmbeddingProvider;

const DEFAULT_MODEL: &str = "text-embedding-3-small";
const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_DIMENSION: usize = 1536;
const DEFAULT_MAX_TOKENS_PER_BATCH: usize = 300_000;

#[derive(Debug, Clone)]
pub struct OpenAIEmbeddings {
    api_key: String,
    model: String,
    dimension: usize,
    base_url: String,
    max_tokens_per_batch: usize,
    client: reqwest::Client,
}

impl OpenAIEmbeddings {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: DEFAULT_MODEL.to_string(),
            dimension: DEFAULT_DIMENSION,
            base_url: DEFAULT_BASE_URL.to_string(),
            max_tokens_per_batch: DEFAULT_MAX_TOKENS_PER_BATCH,
            client: reqwest::Client::new(),
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Valid values for `text-embedding-3-small` are 256, 512, 1024, 1536.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = dimension;
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn request_embeddings(&self, input: Vec<String>) -> Result<Vec<Vec<f32>>> {
        let url = format!("{}/embeddings", self.base_url);

        let request = EmbeddingRequest {
            model: self.model.clone(),
            input,
            dimensions: Some(self.dimension as i32),
            encoding_format: Some("float".to_string()),
        };

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| EngineError::EmbeddingFailed {
                cause: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(EngineError::EmbeddingFailed {
                cause: format!("API error {status}: {error_text}"),
            });
        }

        let result: EmbeddingResponse =
            response
                .json()
                .await
                .map_err(|e| EngineError::EmbeddingFailed {
                    cause: e.to_string(),
                })?;

        let mut embeddings: Vec<(i32, Vec<f32>)> = result
            .data
            .into_iter()
            .map(|e| (e.index, e.embedding))
            .collect();
        embeddings.sort_by_key(|(idx, _)| *idx);

        Ok(embeddings.into_iter().map(|(_, e)| e).collect())
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIEmbeddings {
    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn max_tokens_per_batch(&self) -> usize {
        self.max_tokens_per_batch
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        self.request_embeddings(texts.to_vec()).await
    }
}

#[derive(Debug, Serialize)]
struct EmbeddingRequest {
    model: String,
    input: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    encoding_format: Option<String>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
    #[allow(dead_code)]
    model: String,
    #[allow(dead_code)]
    usage: EmbeddingUsage,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: i32,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingUsage {
    #[allow(dead_code)]
    prompt_tokens: i32,
    #[allow(dead_code)]
    total_tokens: i32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let provider = OpenAIEmbeddings::new("test-key");
        assert_eq!(provider.dimension(), DEFAULT_DIMENSION);
        assert_eq!(provider.model(), DEFAULT_MODEL);
    }

    #[test]
    fn builder_overrides() {
        let provider = OpenAIEmbeddings::new("test-key")
            .with_dimension(512)
            .with_model("text-embedding-3-large")
            .with_base_url("https://custom.api.com");
        assert_eq!(provider.dimension(), 512);
        assert_eq!(provider.model(), "text-embedding-3-large");
        assert_eq!(provider.base_url, "https://custom.api.com");
    }

    #[tokio::test]
    async fn embed_batch_of_empty_input_is_empty_output() {
        let provider = OpenAIEmbeddings::new("test-key");
        let result = provider.embed_batch(&[]).await.unwrap();
        assert!(result.is_empty());
    }
}
