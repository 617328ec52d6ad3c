//! Embedding provider trait and the Ollama implementation.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Errors that can occur during embedding generation.
#[derive(Error, Debug)]
pub enum EmbeddingError {
    #[error("API request failed ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("Rate limited after {0} retries")]
    RateLimited(u32),

    #[error("Network error: {0}")]
    Network(String),
}

/// Trait for embedding providers.
///
/// Implementations should be Send + Sync to allow use in async contexts.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text
    async fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed multiple texts in a batch
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;

    /// Get the number of dimensions
    fn dimensions(&self) -> usize;

    /// Get the model name
    fn model_name(&self) -> &str;

    /// Get the maximum batch size supported.
    fn max_batch_size(&self) -> usize {
        32
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

const MAX_RETRIES: u32 = 3;

/// Embeddings served by an Ollama `/api/embed` endpoint.
pub struct OllamaEmbeddings {
    model: String,
    dimensions: usize,
    client: Client,
    endpoint: String,
    initial_backoff: Duration,
}

impl OllamaEmbeddings {
    /// Defaults to `nomic-embed-text` (768 dimensions) on localhost.
    pub fn new(base_url: Option<String>, model: Option<String>, dimensions: Option<usize>) -> Self {
        let base = base_url.unwrap_or_else(|| "http://localhost:11434".to_string());
        Self {
            model: model.unwrap_or_else(|| "nomic-embed-text".to_string()),
            dimensions: dimensions.unwrap_or(768),
            client: Client::new(),
            endpoint: format!("{}/api/embed", base.trim_end_matches('/')),
            initial_backoff: Duration::from_secs(1),
        }
    }

    /// Override the first retry delay; later delays double it.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Send embedding request with retry logic for rate limits.
    async fn send_request(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let body = EmbedRequest {
            model: &self.model,
            input: texts,
        };

        let mut retry_count = 0;
        let mut backoff = self.initial_backoff;

        loop {
            debug!(
                "Sending embedding request for {} texts to {}",
                texts.len(),
                self.endpoint
            );

            let response = self
                .client
                .post(&self.endpoint)
                .json(&body)
                .send()
                .await
                .map_err(|e| EmbeddingError::Network(e.to_string()))?;

            let status = response.status();

            if status.is_success() {
                let parsed: EmbedResponse = response
                    .json()
                    .await
                    .map_err(|e| EmbeddingError::InvalidResponse(e.to_string()))?;

                if parsed.embeddings.len() != texts.len() {
                    return Err(EmbeddingError::InvalidResponse(format!(
                        "expected {} embeddings, got {}",
                        texts.len(),
                        parsed.embeddings.len()
                    ))
                    .into());
                }
                return Ok(parsed.embeddings);
            }

            if status.as_u16() == 429 {
                retry_count += 1;
                if retry_count > MAX_RETRIES {
                    return Err(EmbeddingError::RateLimited(MAX_RETRIES).into());
                }

                let wait = response
                    .headers()
                    .get("retry-after")
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs)
                    .unwrap_or(backoff);

                warn!(
                    "Rate limited, retrying after {:?} (attempt {}/{})",
                    wait, retry_count, MAX_RETRIES
                );

                tokio::time::sleep(wait).await;
                backoff *= 2;
                continue;
            }

            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(EmbeddingError::Api {
                status: status.as_u16(),
                body,
            }
            .into());
        }
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddings {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let embeddings = self.embed_batch(&[text.to_string()]).await?;
        embeddings
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("No embedding returned"))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.max_batch_size()) {
            out.extend(self.send_request(batch).await?);
        }
        Ok(out)
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
