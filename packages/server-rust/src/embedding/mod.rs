//! Embedding vendor boundary.
//!
//! The server depends only on the [`Embedder`] seam; [`HttpEmbedder`]
//! speaks the common `{model, input}` JSON shape. Batch order is restored
//! from the vendor's per-item indices, so callers can zip results against
//! their inputs regardless of response order.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

use crate::config::EmbeddingConfig;

/// Computes embedding vectors for batches of text.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Configured output dimensions.
    fn dimensions(&self) -> usize;

    /// Embeds a batch, returning one vector per input in input order.
    ///
    /// # Errors
    ///
    /// Transport and vendor errors; callers treat any failure as
    /// transient for the whole batch.
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>>;
}

#[derive(Debug, Deserialize)]
struct EmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingItem>,
}

/// HTTP embedder for OpenAI-shaped embedding endpoints.
pub struct HttpEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl HttpEmbedder {
    /// # Errors
    ///
    /// Fails when the HTTP client cannot be constructed.
    pub fn new(config: EmbeddingConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(60))
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl Embedder for HttpEmbedder {
    fn dimensions(&self) -> usize {
        self.config.dimensions
    }

    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let response = self
            .client
            .post(&self.config.endpoint)
            .bearer_auth(&self.config.api_key)
            .json(&serde_json::json!({
                "model": self.config.model,
                "input": texts,
            }))
            .send()
            .await?
            .error_for_status()?;

        let mut body: EmbeddingResponse = response.json().await?;
        if body.data.len() != texts.len() {
            anyhow::bail!(
                "embedder returned {} vectors for {} inputs",
                body.data.len(),
                texts.len()
            );
        }

        // Vendors may return items out of order; the index field is
        // authoritative.
        body.data.sort_by_key(|item| item.index);
        for item in &body.data {
            if item.embedding.len() != self.config.dimensions {
                anyhow::bail!(
                    "embedding dimension {} does not match configured {}",
                    item.embedding.len(),
                    self.config.dimensions
                );
            }
        }

        debug!(batch = texts.len(), "embedded batch");
        Ok(body.data.into_iter().map(|item| item.embedding).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn response_items_sort_by_index() {
        let mut body: EmbeddingResponse = serde_json::from_value(serde_json::json!({
            "data": [
                {"index": 2, "embedding": [3.0]},
                {"index": 0, "embedding": [1.0]},
                {"index": 1, "embedding": [2.0]},
            ]
        }))
        .unwrap();
        body.data.sort_by_key(|item| item.index);
        let flattened: Vec<f32> = body.data.iter().map(|i| i.embedding[0]).collect();
        assert_eq!(flattened, [1.0, 2.0, 3.0]);
    }

    #[test]
    fn dimensions_come_from_config() {
        let embedder = HttpEmbedder::new(EmbeddingConfig {
            dimensions: 8,
            ..EmbeddingConfig::default()
        })
        .unwrap();
        assert_eq!(embedder.dimensions(), 8);
    }
}
