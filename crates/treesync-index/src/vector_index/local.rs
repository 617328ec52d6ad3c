//! File-backed index stored as `<data_dir>/<tree_id>_vectors.json`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{IndexEntry, VectorIndex};
use crate::embeddings::EmbeddingProvider;
use crate::state::{write_json_atomic, TreeId};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredVector {
    text: String,
    metadata: serde_json::Value,
    vector: Vec<f32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct StoredIndex {
    model: String,
    dimensions: usize,
    entries: BTreeMap<String, StoredVector>,
}

/// [`VectorIndex`] kept in memory and written to one JSON file on persist.
pub struct LocalVectorIndex {
    path: PathBuf,
    embedder: Arc<dyn EmbeddingProvider>,
    state: Mutex<Option<StoredIndex>>,
}

impl LocalVectorIndex {
    /// Open the index for `tree`, loading the stored file if there is one.
    pub fn open(data_dir: &Path, tree: &TreeId, embedder: Arc<dyn EmbeddingProvider>) -> Result<Self> {
        let path = data_dir.join(format!("{}_vectors.json", tree));
        let state = if path.exists() {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            let stored: StoredIndex = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse {}", path.display()))?;
            debug!("Loaded {} vectors from {}", stored.entries.len(), path.display());
            Some(stored)
        } else {
            None
        };

        Ok(Self {
            path,
            embedder,
            state: Mutex::new(state),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored vectors, zero when no index exists.
    pub async fn len(&self) -> usize {
        self.state
            .lock()
            .await
            .as_ref()
            .map(|s| s.entries.len())
            .unwrap_or(0)
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    async fn embed(&self, entries: Vec<IndexEntry>) -> Result<Vec<(String, StoredVector)>> {
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let texts: Vec<String> = entries.iter().map(|e| e.text.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;
        if vectors.len() != entries.len() {
            bail!(
                "Embedding provider returned {} vectors for {} texts",
                vectors.len(),
                entries.len()
            );
        }

        Ok(entries
            .into_iter()
            .zip(vectors)
            .map(|(entry, vector)| {
                (
                    entry.id,
                    StoredVector {
                        text: entry.text,
                        metadata: entry.metadata,
                        vector,
                    },
                )
            })
            .collect())
    }
}

#[async_trait]
impl VectorIndex for LocalVectorIndex {
    async fn exists(&self) -> Result<bool> {
        Ok(self.state.lock().await.is_some())
    }

    async fn create(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let embedded = self.embed(entries).await?;
        info!("Creating local index with {} vectors", embedded.len());

        *self.state.lock().await = Some(StoredIndex {
            model: self.embedder.model_name().to_string(),
            dimensions: self.embedder.dimensions(),
            entries: embedded.into_iter().collect(),
        });
        Ok(())
    }

    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        let embedded = self.embed(entries).await?;
        let mut guard = self.state.lock().await;
        let Some(stored) = guard.as_mut() else {
            bail!("No index exists at {}", self.path.display());
        };
        debug!("Inserting {} vectors", embedded.len());
        stored.entries.extend(embedded);
        Ok(())
    }

    async fn retract(&self, ids: &[String]) -> Result<usize> {
        let mut guard = self.state.lock().await;
        let Some(stored) = guard.as_mut() else {
            return Ok(0);
        };
        let removed = ids
            .iter()
            .filter(|id| stored.entries.remove(id.as_str()).is_some())
            .count();
        debug!("Retracted {} of {} requested vectors", removed, ids.len());
        Ok(removed)
    }

    async fn persist(&self) -> Result<()> {
        let guard = self.state.lock().await;
        let Some(stored) = guard.as_ref() else {
            return Ok(());
        };
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        write_json_atomic(&self.path, stored)?;
        debug!("Persisted {} vectors to {}", stored.entries.len(), self.path.display());
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        *self.state.lock().await = None;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("Removed index file {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("Failed to remove {}", self.path.display())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Embeds a text as `[len, calls]`.
    struct StubEmbeddings {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl EmbeddingProvider for StubEmbeddings {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            Ok(vec![text.len() as f32, 0.0])
        }

        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) as f32;
            Ok(texts.iter().map(|t| vec![t.len() as f32, call]).collect())
        }

        fn dimensions(&self) -> usize {
            2
        }

        fn model_name(&self) -> &str {
            "stub"
        }
    }

    fn embedder() -> Arc<dyn EmbeddingProvider> {
        Arc::new(StubEmbeddings {
            calls: AtomicUsize::new(0),
        })
    }

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            text: format!("text of {}", id),
            metadata: serde_json::json!({ "chunk_id": id }),
        }
    }

    #[tokio::test]
    async fn test_create_persist_reopen() {
        let dir = tempdir().unwrap();
        let tree = TreeId::new("repo");

        let index = LocalVectorIndex::open(dir.path(), &tree, embedder()).unwrap();
        assert!(!index.exists().await.unwrap());
        index.create(vec![entry("a-0"), entry("b-0")]).await.unwrap();
        index.persist().await.unwrap();
        assert!(dir.path().join("repo_vectors.json").exists());

        let reopened = LocalVectorIndex::open(dir.path(), &tree, embedder()).unwrap();
        assert!(reopened.exists().await.unwrap());
        assert_eq!(reopened.len().await, 2);
    }

    #[tokio::test]
    async fn test_insert_replaces_same_identity() {
        let dir = tempdir().unwrap();
        let index = LocalVectorIndex::open(dir.path(), &TreeId::new("repo"), embedder()).unwrap();
        index.create(vec![entry("a-0")]).await.unwrap();
        index.insert(vec![entry("a-0"), entry("a-1")]).await.unwrap();
        assert_eq!(index.len().await, 2);
    }

    #[tokio::test]
    async fn test_retract_counts_present_only() {
        let dir = tempdir().unwrap();
        let index = LocalVectorIndex::open(dir.path(), &TreeId::new("repo"), embedder()).unwrap();
        index.create(vec![entry("a-0"), entry("a-1")]).await.unwrap();

        let removed = index
            .retract(&["a-0".to_string(), "zzz".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert_eq!(index.len().await, 1);
    }

    #[tokio::test]
    async fn test_destroy_removes_file() {
        let dir = tempdir().unwrap();
        let index = LocalVectorIndex::open(dir.path(), &TreeId::new("repo"), embedder()).unwrap();
        index.create(vec![entry("a-0")]).await.unwrap();
        index.persist().await.unwrap();

        index.destroy().await.unwrap();
        assert!(!index.path().exists());
        assert!(!index.exists().await.unwrap());
        // a second destroy is a no-op
        index.destroy().await.unwrap();
    }

    #[tokio::test]
    async fn test_insert_without_index_fails() {
        let dir = tempdir().unwrap();
        let index = LocalVectorIndex::open(dir.path(), &TreeId::new("repo"), embedder()).unwrap();
        assert!(index.insert(vec![entry("a-0")]).await.is_err());
    }
}
