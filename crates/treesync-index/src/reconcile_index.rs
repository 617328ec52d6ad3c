//! Applies a manifest reconciliation to the vector index.
//!
//! This is the only place that mutates a [`VectorIndex`]. It runs after the
//! new manifest is fully computed in memory, and any failure is fatal to
//! the run so that nothing is persisted.

use tracing::{debug, info};

use crate::error::SyncError;
use crate::manifest::Reconciliation;
use crate::vector_index::{IndexEntry, VectorIndex};

/// What the reconciler did to the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    /// No index existed; one was built from the whole manifest
    Created { inserted: usize },
    /// The existing index was updated in place
    Updated { retracted: usize, inserted: usize },
    /// The manifest is empty; any existing index was removed
    Emptied,
    /// Nothing needed to change
    Untouched,
}

impl IndexOutcome {
    pub fn retracted(&self) -> usize {
        match self {
            IndexOutcome::Updated { retracted, .. } => *retracted,
            _ => 0,
        }
    }

    pub fn inserted(&self) -> usize {
        match self {
            IndexOutcome::Created { inserted } | IndexOutcome::Updated { inserted, .. } => {
                *inserted
            }
            _ => 0,
        }
    }
}

/// Bring `index` in line with `reconciliation.next`.
///
/// With an existing index the retractions are applied first, then the
/// inserts. Without one, the index is built from the entire next manifest,
/// not only the newly produced chunks.
pub async fn apply_to_index<I: VectorIndex + ?Sized>(
    index: &I,
    reconciliation: &Reconciliation,
) -> Result<IndexOutcome, SyncError> {
    let exists = index.exists().await.map_err(SyncError::Index)?;

    if reconciliation.next.is_empty() {
        if exists {
            info!("Manifest is empty, removing vector index");
            index.destroy().await.map_err(SyncError::Index)?;
        }
        return Ok(IndexOutcome::Emptied);
    }

    if !exists {
        let entries: Vec<IndexEntry> = reconciliation
            .next
            .chunks
            .iter()
            .map(IndexEntry::from_chunk)
            .collect();
        let inserted = entries.len();
        info!("Building vector index from {} chunks", inserted);
        index.create(entries).await.map_err(SyncError::Index)?;
        index.persist().await.map_err(SyncError::Index)?;
        return Ok(IndexOutcome::Created { inserted });
    }

    if reconciliation.retract_ids.is_empty() && reconciliation.inserted.is_empty() {
        debug!("Vector index already up to date");
        return Ok(IndexOutcome::Untouched);
    }

    let mut retracted = 0;
    if !reconciliation.retract_ids.is_empty() {
        retracted = index
            .retract(&reconciliation.retract_ids)
            .await
            .map_err(SyncError::Index)?;
    }

    let inserted = reconciliation.inserted.len();
    if inserted > 0 {
        let entries = reconciliation
            .inserted
            .iter()
            .map(IndexEntry::from_chunk)
            .collect();
        index.insert(entries).await.map_err(SyncError::Index)?;
    }

    index.persist().await.map_err(SyncError::Index)?;

    info!(
        "Vector index updated: {} retracted, {} inserted",
        retracted, inserted
    );
    Ok(IndexOutcome::Updated {
        retracted,
        inserted,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::Chunk;
    use crate::manifest::Manifest;
    use crate::vector_index::MemoryVectorIndex;

    fn chunk(unit: &str, ordinal: usize) -> Chunk {
        Chunk {
            tree_id: "repo".to_string(),
            file_path: unit.to_string(),
            chunk_id: Chunk::make_id(unit, ordinal),
            ordinal,
            lang: "python".to_string(),
            start_line: None,
            end_line: None,
            content: format!("{} {}", unit, ordinal),
            summary: String::new(),
            keywords: Vec::new(),
        }
    }

    #[tokio::test]
    async fn test_builds_from_whole_manifest_when_absent() {
        let index = MemoryVectorIndex::new();
        let rec = Reconciliation {
            retract_ids: vec![],
            inserted: vec![chunk("b.py", 0)],
            next: Manifest::new(vec![chunk("a.py", 0), chunk("b.py", 0)]),
        };

        let outcome = apply_to_index(&index, &rec).await.unwrap();

        assert_eq!(outcome, IndexOutcome::Created { inserted: 2 });
        assert_eq!(index.ids().await, vec!["a.py-0", "b.py-0"]);
        assert_eq!(index.persist_count(), 1);
    }

    #[tokio::test]
    async fn test_retracts_then_inserts() {
        let index = MemoryVectorIndex::new();
        index
            .create(vec![
                IndexEntry::from_chunk(&chunk("a.py", 0)),
                IndexEntry::from_chunk(&chunk("b.py", 0)),
                IndexEntry::from_chunk(&chunk("b.py", 1)),
            ])
            .await
            .unwrap();

        let rec = Reconciliation {
            retract_ids: vec!["b.py-0".into(), "b.py-1".into()],
            inserted: vec![chunk("b.py", 0)],
            next: Manifest::new(vec![chunk("a.py", 0), chunk("b.py", 0)]),
        };

        let outcome = apply_to_index(&index, &rec).await.unwrap();
        assert_eq!(
            outcome,
            IndexOutcome::Updated {
                retracted: 2,
                inserted: 1
            }
        );
        assert_eq!(index.ids().await, vec!["a.py-0", "b.py-0"]);
    }

    #[tokio::test]
    async fn test_empty_manifest_destroys_index() {
        let index = MemoryVectorIndex::new();
        index
            .create(vec![IndexEntry::from_chunk(&chunk("a.py", 0))])
            .await
            .unwrap();

        let rec = Reconciliation {
            retract_ids: vec!["a.py-0".into()],
            inserted: vec![],
            next: Manifest::default(),
        };

        assert_eq!(apply_to_index(&index, &rec).await.unwrap(), IndexOutcome::Emptied);
        assert!(!index.exists().await.unwrap());
    }

    #[tokio::test]
    async fn test_empty_manifest_without_index_builds_nothing() {
        let index = MemoryVectorIndex::new();
        let outcome = apply_to_index(&index, &Reconciliation::default()).await.unwrap();
        assert_eq!(outcome, IndexOutcome::Emptied);
        assert_eq!(index.mutation_count(), 0);
    }

    #[tokio::test]
    async fn test_nothing_to_do_is_untouched() {
        let index = MemoryVectorIndex::new();
        index
            .create(vec![IndexEntry::from_chunk(&chunk("a.py", 0))])
            .await
            .unwrap();
        let rec = Reconciliation {
            retract_ids: vec![],
            inserted: vec![],
            next: Manifest::new(vec![chunk("a.py", 0)]),
        };

        assert_eq!(apply_to_index(&index, &rec).await.unwrap(), IndexOutcome::Untouched);
        assert_eq!(index.mutation_count(), 1);
    }

    #[tokio::test]
    async fn test_index_failure_is_fatal() {
        let index = MemoryVectorIndex::new();
        index.set_failing(true);
        let rec = Reconciliation {
            retract_ids: vec![],
            inserted: vec![chunk("a.py", 0)],
            next: Manifest::new(vec![chunk("a.py", 0)]),
        };

        let err = apply_to_index(&index, &rec).await.unwrap_err();
        assert!(matches!(err, SyncError::Index(_)));
    }
}
