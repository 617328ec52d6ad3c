//! Synchronisation engine.
//!
//! One run scans the tree, detects what changed since the last run,
//! extracts the changed units in parallel, reconciles the manifest, applies
//! the result to the vector index, and only then persists the new cache and
//! manifest. A run that detects no change writes nothing.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::changeset::ChangeSet;
use crate::chunk::Chunk;
use crate::dispatch::{DispatchConfig, Dispatcher, UnitFailure};
use crate::error::SyncError;
use crate::extract::UnitExtractor;
use crate::ignore_rules::IgnoreRules;
use crate::manifest::reconcile;
use crate::reconcile_index::{apply_to_index, IndexOutcome};
use crate::scan::{scan_tree, DEFAULT_BINARY_EXTENSIONS};
use crate::state::{StateStore, TreeId};
use crate::vector_index::VectorIndex;
use crate::TREE_UNIT;

/// Configuration for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub dispatch: DispatchConfig,
    /// Extensions (without dot) listed in the tree but never extracted
    pub binary_extensions: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dispatch: DispatchConfig::default(),
            binary_extensions: DEFAULT_BINARY_EXTENSIONS
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// How a run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Nothing changed; no extraction, index mutation or write happened
    NoChanges,
    /// Changes were applied to the index and state was persisted
    Applied(IndexOutcome),
}

/// Statistics about one run.
#[derive(Debug, Clone)]
pub struct SyncReport {
    /// Units extracted successfully
    pub processed: usize,
    /// Units whose extraction failed
    pub failed: usize,
    /// Units removed since the last run
    pub deleted: usize,
    /// Units carried forward without extraction
    pub unchanged: usize,
    /// Whether the directory listing changed
    pub tree_changed: bool,
    /// Chunk identities retracted from the manifest
    pub chunks_retracted: usize,
    /// Chunks added to the manifest
    pub chunks_inserted: usize,
    /// Total chunks in the manifest after the run
    pub total_chunks: usize,
    pub failures: Vec<UnitFailure>,
    pub outcome: SyncOutcome,
    pub duration_ms: u64,
}

impl fmt::Display for SyncReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "processed {}, failed {}, deleted {}, unchanged {}",
            self.processed, self.failed, self.deleted, self.unchanged
        )?;
        if self.tree_changed {
            write!(f, ", tree changed")?;
        }
        write!(
            f,
            "; chunks -{} +{} ({} total) in {}ms",
            self.chunks_retracted, self.chunks_inserted, self.total_chunks, self.duration_ms
        )
    }
}

/// Drives incremental synchronisation for any number of trees.
pub struct SyncEngine<X: ?Sized, I: ?Sized> {
    dispatcher: Dispatcher<X>,
    index: Arc<I>,
    state: StateStore,
    config: EngineConfig,
}

impl<X, I> SyncEngine<X, I>
where
    X: UnitExtractor + ?Sized + 'static,
    I: VectorIndex + ?Sized,
{
    pub fn new(extractor: Arc<X>, index: Arc<I>, state: StateStore, config: EngineConfig) -> Self {
        Self {
            dispatcher: Dispatcher::new(extractor, config.dispatch.clone()),
            index,
            state,
            config,
        }
    }

    pub fn state(&self) -> &StateStore {
        &self.state
    }

    /// Run one synchronisation of `root` as tree `tree`.
    ///
    /// Cancelling `cancel` abandons in-flight units and returns
    /// [`SyncError::Cancelled`] without touching the index or state.
    pub async fn run(
        &self,
        root: &Path,
        tree: &TreeId,
        rules: &dyn IgnoreRules,
        cancel: &CancellationToken,
    ) -> Result<SyncReport, SyncError> {
        let start = Instant::now();

        if !root.is_dir() {
            return Err(SyncError::MissingRoot(root.to_path_buf()));
        }

        let previous_cache = self.state.load_cache(tree)?;
        let previous_manifest = self.state.load_manifest(tree)?;
        debug!(
            "Loaded state for {}: {} cached units, {} chunks",
            tree,
            previous_cache.len(),
            previous_manifest.len()
        );

        let scan = scan_tree(root, rules, &self.config.binary_extensions);
        let changes = ChangeSet::detect(&previous_cache, &scan);

        info!(
            "Scanned {}: {} changed or new, {} deleted, {} unchanged{}",
            root.display(),
            changes.changed_or_new.len(),
            changes.deleted.len(),
            changes.unchanged.len(),
            if changes.tree_changed { ", tree changed" } else { "" }
        );

        if changes.is_empty() {
            info!("No changes in {}", tree);
            return Ok(SyncReport {
                processed: 0,
                failed: 0,
                deleted: 0,
                unchanged: changes.unchanged.len(),
                tree_changed: false,
                chunks_retracted: 0,
                chunks_inserted: 0,
                total_chunks: previous_manifest.len(),
                failures: Vec::new(),
                outcome: SyncOutcome::NoChanges,
                duration_ms: elapsed_ms(start.elapsed()),
            });
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        let dispatched = self
            .dispatcher
            .dispatch(root, tree.as_str(), &changes.changed_or_new, cancel)
            .await;

        if dispatched.cancelled {
            warn!("Run for {} cancelled; nothing was persisted", tree);
            return Err(SyncError::Cancelled);
        }

        let failed_units = dispatched.failed_units();
        let processed = dispatched.results.len();
        let mut produced = dispatched.results;
        if changes.tree_changed {
            produced.insert(
                TREE_UNIT.to_string(),
                vec![Chunk::tree(tree.as_str(), &scan.tree_listing)],
            );
        }

        let reconciliation = reconcile(&previous_manifest, &changes.affected(), &produced);
        let index_outcome = apply_to_index(self.index.as_ref(), &reconciliation).await?;

        let next_cache = ChangeSet::next_cache(&previous_cache, &scan, &failed_units);
        self.state.save(tree, &reconciliation.next, &next_cache)?;

        let report = SyncReport {
            processed,
            failed: dispatched.failures.len(),
            deleted: changes.deleted.len(),
            unchanged: changes.unchanged.len(),
            tree_changed: changes.tree_changed,
            chunks_retracted: reconciliation.retract_ids.len(),
            chunks_inserted: reconciliation.inserted.len(),
            total_chunks: reconciliation.next.len(),
            failures: dispatched.failures,
            outcome: SyncOutcome::Applied(index_outcome),
            duration_ms: elapsed_ms(start.elapsed()),
        };

        info!("Synchronised {}: {}", tree, report);
        Ok(report)
    }
}

fn elapsed_ms(elapsed: Duration) -> u64 {
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ExtractError;
    use crate::extract::ExtractedSpan;
    use crate::ignore_rules::NoIgnore;
    use crate::vector_index::MemoryVectorIndex;
    use async_trait::async_trait;
    use tempfile::tempdir;

    struct WholeUnit;

    #[async_trait]
    impl UnitExtractor for WholeUnit {
        async fn extract(
            &self,
            _unit: &str,
            content: &str,
            _lang: &str,
        ) -> Result<Vec<ExtractedSpan>, ExtractError> {
            Ok(vec![ExtractedSpan {
                content: content.to_string(),
                start_line: Some(1),
                end_line: Some(content.lines().count().max(1)),
                summary: String::new(),
                keywords: Vec::new(),
            }])
        }
    }

    #[tokio::test]
    async fn test_missing_root() {
        let data = tempdir().unwrap();
        let engine = SyncEngine::new(
            Arc::new(WholeUnit),
            Arc::new(MemoryVectorIndex::new()),
            StateStore::new(data.path()),
            EngineConfig::default(),
        );

        let err = engine
            .run(
                &data.path().join("absent"),
                &TreeId::new("repo"),
                &NoIgnore,
                &CancellationToken::new(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::MissingRoot(_)));
    }

    #[tokio::test]
    async fn test_empty_tree_indexes_listing_only() {
        let src = tempdir().unwrap();
        let data = tempdir().unwrap();
        let index = Arc::new(MemoryVectorIndex::new());
        let engine = SyncEngine::new(
            Arc::new(WholeUnit),
            index.clone(),
            StateStore::new(data.path()),
            EngineConfig::default(),
        );

        let report = engine
            .run(src.path(), &TreeId::new("repo"), &NoIgnore, &CancellationToken::new())
            .await
            .unwrap();

        assert!(report.tree_changed);
        assert_eq!(report.processed, 0);
        assert_eq!(index.ids().await, vec![format!("{}-0", TREE_UNIT)]);
    }

    #[tokio::test]
    async fn test_pre_cancelled_run_writes_nothing() {
        let src = tempdir().unwrap();
        std::fs::write(src.path().join("a.py"), "x = 1").unwrap();
        let data = tempdir().unwrap();
        let store = StateStore::new(data.path());
        let engine = SyncEngine::new(
            Arc::new(WholeUnit),
            Arc::new(MemoryVectorIndex::new()),
            store.clone(),
            EngineConfig::default(),
        );

        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = engine
            .run(src.path(), &TreeId::new("repo"), &NoIgnore, &cancel)
            .await
            .unwrap_err();

        assert!(matches!(err, SyncError::Cancelled));
        assert!(!store.cache_path(&TreeId::new("repo")).exists());
    }

    #[test]
    fn test_report_display() {
        let report = SyncReport {
            processed: 2,
            failed: 1,
            deleted: 0,
            unchanged: 5,
            tree_changed: true,
            chunks_retracted: 3,
            chunks_inserted: 4,
            total_chunks: 10,
            failures: Vec::new(),
            outcome: SyncOutcome::NoChanges,
            duration_ms: 12,
        };
        assert_eq!(
            report.to_string(),
            "processed 2, failed 1, deleted 0, unchanged 5, tree changed; chunks -3 +4 (10 total) in 12ms"
        );
    }
}
