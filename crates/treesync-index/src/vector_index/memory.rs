//! In-process index for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use anyhow::{bail, Result};
use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{IndexEntry, VectorIndex};

/// [`VectorIndex`] held in memory, with counters for every mutation.
#[derive(Default)]
pub struct MemoryVectorIndex {
    entries: Mutex<Option<BTreeMap<String, IndexEntry>>>,
    mutations: AtomicUsize,
    persists: AtomicUsize,
    failing: AtomicBool,
}

impl MemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later mutation fail until reset.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Number of create, insert, retract and destroy calls so far.
    pub fn mutation_count(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    pub fn persist_count(&self) -> usize {
        self.persists.load(Ordering::SeqCst)
    }

    /// Current entries, or `None` when no index exists.
    pub async fn snapshot(&self) -> Option<BTreeMap<String, IndexEntry>> {
        self.entries.lock().await.clone()
    }

    /// Identities currently stored, sorted.
    pub async fn ids(&self) -> Vec<String> {
        self.entries
            .lock()
            .await
            .as_ref()
            .map(|e| e.keys().cloned().collect())
            .unwrap_or_default()
    }

    fn begin_mutation(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("index unavailable");
        }
        self.mutations.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl VectorIndex for MemoryVectorIndex {
    async fn exists(&self) -> Result<bool> {
        Ok(self.entries.lock().await.is_some())
    }

    async fn create(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.begin_mutation()?;
        let map = entries.into_iter().map(|e| (e.id.clone(), e)).collect();
        *self.entries.lock().await = Some(map);
        Ok(())
    }

    async fn insert(&self, entries: Vec<IndexEntry>) -> Result<()> {
        self.begin_mutation()?;
        let mut guard = self.entries.lock().await;
        let Some(map) = guard.as_mut() else {
            bail!("index does not exist");
        };
        for entry in entries {
            map.insert(entry.id.clone(), entry);
        }
        Ok(())
    }

    async fn retract(&self, ids: &[String]) -> Result<usize> {
        self.begin_mutation()?;
        let mut guard = self.entries.lock().await;
        let Some(map) = guard.as_mut() else {
            return Ok(0);
        };
        Ok(ids.iter().filter(|id| map.remove(*id).is_some()).count())
    }

    async fn persist(&self) -> Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            bail!("index unavailable");
        }
        self.persists.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn destroy(&self) -> Result<()> {
        self.begin_mutation()?;
        *self.entries.lock().await = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> IndexEntry {
        IndexEntry {
            id: id.to_string(),
            text: id.to_string(),
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn test_lifecycle() {
        tokio_test::block_on(async {
            let index = MemoryVectorIndex::new();
            assert!(!index.exists().await.unwrap());

            index.create(vec![entry("a-0"), entry("b-0")]).await.unwrap();
            index.insert(vec![entry("c-0")]).await.unwrap();
            assert_eq!(index.ids().await, vec!["a-0", "b-0", "c-0"]);

            index.destroy().await.unwrap();
            assert!(index.snapshot().await.is_none());
            assert_eq!(index.mutation_count(), 3);
        });
    }

    #[tokio::test]
    async fn test_retract_ignores_absent_ids() {
        let index = MemoryVectorIndex::new();
        index.create(vec![entry("a-0")]).await.unwrap();

        let removed = index
            .retract(&["a-0".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(index.ids().await.is_empty());
    }

    #[tokio::test]
    async fn test_insert_requires_index() {
        let index = MemoryVectorIndex::new();
        assert!(index.insert(vec![entry("a-0")]).await.is_err());
    }

    #[tokio::test]
    async fn test_failing_mode() {
        let index = MemoryVectorIndex::new();
        index.set_failing(true);
        assert!(index.create(vec![]).await.is_err());
        assert!(index.persist().await.is_err());
        assert_eq!(index.mutation_count(), 0);
    }
}
