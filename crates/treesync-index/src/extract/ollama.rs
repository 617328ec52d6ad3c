//! Enrichment through an Ollama-compatible chat endpoint.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{Enricher, Enrichment};
use crate::error::ExtractError;

/// Endpoint configuration for [`OllamaEnricher`].
#[derive(Debug, Clone)]
pub struct OllamaEnricherConfig {
    /// Server base URL, without the `/api/chat` suffix
    pub base_url: String,
    /// Chat model used for summaries
    pub model: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for OllamaEnricherConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "qwen2.5-coder:latest".to_string(),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    format: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: Option<ChatResponseMessage>,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: String,
}

/// Keywords arrive either as `"a, b"` or `["a", "b"]`.
#[derive(Deserialize)]
#[serde(untagged)]
enum Keywords {
    List(Vec<String>),
    Text(String),
}

impl Default for Keywords {
    fn default() -> Self {
        Keywords::List(Vec::new())
    }
}

impl Keywords {
    fn into_vec(self) -> Vec<String> {
        let raw = match self {
            Keywords::List(items) => items,
            Keywords::Text(text) => text.split(',').map(|s| s.to_string()).collect(),
        };
        raw.into_iter()
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .collect()
    }
}

#[derive(Deserialize)]
struct EnrichmentPayload {
    #[serde(default)]
    summary: String,
    #[serde(default)]
    keywords: Keywords,
}

/// [`Enricher`] backed by an Ollama chat model.
///
/// Any HTTP or decoding failure is reported as
/// [`ExtractError::Enrichment`] so the dispatcher can record it against
/// the unit and move on.
pub struct OllamaEnricher {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaEnricher {
    pub fn new(config: OllamaEnricherConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to build enrichment HTTP client")?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            model: config.model,
        })
    }

    fn prompt(content: &str) -> String {
        format!(
            "Analyze the following source fragment. Reply with a JSON object that has \
             exactly two keys: \"summary\" (one sentence describing what it does) and \
             \"keywords\" (a comma-separated list of the identifiers and concepts it \
             involves).\n\nFragment:\n```\n{}\n```",
            content
        )
    }
}

#[async_trait]
impl Enricher for OllamaEnricher {
    async fn enrich(&self, content: &str) -> Result<Enrichment, ExtractError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![ChatMessage {
                role: "user",
                content: Self::prompt(content),
            }],
            format: "json",
            stream: false,
        };

        debug!("Requesting enrichment for {} chars", content.len());

        let response = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .map_err(|e| ExtractError::Enrichment(format!("request to {} failed: {}", self.endpoint, e)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            if status.as_u16() == 500 {
                warn!("Enrichment server returned 500; it may be short on memory");
            }
            return Err(ExtractError::Enrichment(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let chat: ChatResponse = response
            .json()
            .await
            .map_err(|e| ExtractError::Enrichment(format!("invalid response body: {}", e)))?;

        let raw = chat.message.map(|m| m.content).unwrap_or_else(|| "{}".to_string());
        let payload: EnrichmentPayload = serde_json::from_str(&raw)
            .map_err(|e| ExtractError::Enrichment(format!("invalid enrichment JSON: {}", e)))?;

        Ok(Enrichment {
            summary: payload.summary.trim().to_string(),
            keywords: payload.keywords.into_vec(),
        })
    }
}
