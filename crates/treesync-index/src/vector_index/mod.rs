//! Vector index collaborator.
//!
//! The engine only ever mutates an index through [`VectorIndex`], and only
//! from the index reconciler. Entries are keyed by chunk identity, so
//! retraction is addressable and re-insertion of the same identity
//! replaces the previous entry.

mod local;
mod memory;
mod qdrant;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;

pub use local::LocalVectorIndex;
pub use memory::MemoryVectorIndex;
pub use qdrant::{QdrantConfig, QdrantVectorIndex};

/// One record handed to the index.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    /// Chunk identity
    pub id: String,
    /// Text to embed
    pub text: String,
    /// Chunk metadata stored alongside the vector
    pub metadata: serde_json::Value,
}

impl IndexEntry {
    pub fn from_chunk(chunk: &Chunk) -> Self {
        Self {
            id: chunk.chunk_id.clone(),
            text: chunk.index_text(),
            metadata: chunk.metadata(),
        }
    }
}

/// Similarity-search store for one source tree.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Whether an index has been built for this tree
    async fn exists(&self) -> Result<bool>;

    /// Build a fresh index holding exactly `entries`
    async fn create(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Add entries, replacing any with the same identity
    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()>;

    /// Remove entries by identity; absent identities are ignored.
    /// Returns how many entries were actually removed.
    async fn retract(&self, ids: &[String]) -> Result<usize>;

    /// Make previous mutations durable
    async fn persist(&self) -> Result<()>;

    /// Remove the index and any stored artifact
    async fn destroy(&self) -> Result<()>;
}
