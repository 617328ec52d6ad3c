//! Extraction and enrichment collaborators.
//!
//! The dispatcher only knows [`UnitExtractor`]: given a unit's text and
//! language it returns ordered spans carrying their enrichment. The
//! supplied [`EnrichingExtractor`] composes a pure [`Splitter`] with an
//! [`Enricher`] that annotates each span.

mod ollama;
mod splitter;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ExtractError;

pub use ollama::{OllamaEnricher, OllamaEnricherConfig};
pub use splitter::ParagraphSplitter;

/// A span produced by a splitter, before enrichment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawSpan {
    pub content: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
}

/// Summary and keywords for one span.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Enrichment {
    pub summary: String,
    pub keywords: Vec<String>,
}

/// A fully extracted and enriched span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedSpan {
    pub content: String,
    pub start_line: Option<usize>,
    pub end_line: Option<usize>,
    pub summary: String,
    pub keywords: Vec<String>,
}

impl ExtractedSpan {
    fn from_parts(span: RawSpan, enrichment: Enrichment) -> Self {
        Self {
            content: span.content,
            start_line: span.start_line,
            end_line: span.end_line,
            summary: enrichment.summary,
            keywords: enrichment.keywords,
        }
    }
}

/// Turns one unit's text into ordered, enriched spans.
///
/// Implementations must be deterministic in the number and order of
/// spans for identical input, since chunk identities derive from the
/// span position.
#[async_trait]
pub trait UnitExtractor: Send + Sync {
    async fn extract(
        &self,
        unit: &str,
        content: &str,
        lang: &str,
    ) -> Result<Vec<ExtractedSpan>, ExtractError>;
}

/// Splits text into spans without any external calls.
pub trait Splitter: Send + Sync {
    fn split(&self, content: &str, lang: &str) -> Vec<RawSpan>;
}

/// Annotates one span with a summary and keywords.
#[async_trait]
pub trait Enricher: Send + Sync {
    async fn enrich(&self, content: &str) -> Result<Enrichment, ExtractError>;
}

/// [`UnitExtractor`] that splits with `S` and enriches every span with `E`.
pub struct EnrichingExtractor<S, E> {
    splitter: S,
    enricher: E,
}

impl<S: Splitter, E: Enricher> EnrichingExtractor<S, E> {
    pub fn new(splitter: S, enricher: E) -> Self {
        Self { splitter, enricher }
    }
}

#[async_trait]
impl<S: Splitter, E: Enricher> UnitExtractor for EnrichingExtractor<S, E> {
    async fn extract(
        &self,
        unit: &str,
        content: &str,
        lang: &str,
    ) -> Result<Vec<ExtractedSpan>, ExtractError> {
        if lang == "unknown" {
            debug!("No extractor for {}, skipping", unit);
            return Ok(Vec::new());
        }

        let spans = self.splitter.split(content, lang);
        let mut out = Vec::with_capacity(spans.len());
        for span in spans {
            let enrichment = if span.content.trim().is_empty() {
                Enrichment::default()
            } else {
                self.enricher.enrich(&span.content).await?
            };
            out.push(ExtractedSpan::from_parts(span, enrichment));
        }
        debug!("Extracted {} spans from {}", out.len(), unit);
        Ok(out)
    }
}
