//! Bounded parallel extraction of changed units.
//!
//! Each unit runs in its own task behind a semaphore. Tasks share no
//! mutable state: every task returns a self-contained result keyed by
//! unit identity and results are merged only once all tasks are done.
//! A failing unit never stops the others.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::chunk::{detect_language, Chunk};
use crate::error::ExtractError;
use crate::extract::UnitExtractor;

/// Default time budget for extracting and enriching one unit.
pub const DEFAULT_UNIT_TIMEOUT_SECS: u64 = 300;

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Maximum number of units processed at once
    pub workers: usize,
    /// Time budget per unit; exceeding it fails the unit
    pub unit_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            unit_timeout: Duration::from_secs(DEFAULT_UNIT_TIMEOUT_SECS),
        }
    }
}

/// One worker per available core.
pub fn default_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// A unit that could not be extracted in this run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    pub unit: String,
    pub error: String,
}

/// Merged results of one dispatch batch.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    /// Chunks per successfully extracted unit
    pub results: BTreeMap<String, Vec<Chunk>>,
    /// Units that failed, with the reason
    pub failures: Vec<UnitFailure>,
    /// Set when the batch was cancelled before every unit resolved
    pub cancelled: bool,
}

impl DispatchOutcome {
    pub fn failed_units(&self) -> BTreeSet<String> {
        self.failures.iter().map(|f| f.unit.clone()).collect()
    }
}

/// Runs a [`UnitExtractor`] over many units with bounded parallelism.
pub struct Dispatcher<X: ?Sized> {
    extractor: Arc<X>,
    config: DispatchConfig,
    semaphore: Arc<Semaphore>,
}

impl<X: UnitExtractor + ?Sized + 'static> Dispatcher<X> {
    pub fn new(extractor: Arc<X>, config: DispatchConfig) -> Self {
        let workers = config.workers.max(1);
        Self {
            extractor,
            semaphore: Arc::new(Semaphore::new(workers)),
            config,
        }
    }

    pub fn config(&self) -> &DispatchConfig {
        &self.config
    }

    /// Extract every unit in `units`, reading files under `root`.
    pub async fn dispatch(
        &self,
        root: &Path,
        tree_id: &str,
        units: &[String],
        cancel: &CancellationToken,
    ) -> DispatchOutcome {
        let mut outcome = DispatchOutcome::default();
        if units.is_empty() {
            return outcome;
        }

        info!(
            "Dispatching {} units with {} workers",
            units.len(),
            self.config.workers.max(1)
        );

        let mut handles = Vec::with_capacity(units.len());
        for unit in units {
            let unit_id = unit.clone();
            let path = root.join(unit);
            let tree_id = tree_id.to_string();
            let extractor = self.extractor.clone();
            let semaphore = self.semaphore.clone();
            let cancel = cancel.clone();
            let timeout = self.config.unit_timeout;

            let handle = tokio::spawn(async move {
                let _permit = tokio::select! {
                    _ = cancel.cancelled() => return Err(ExtractError::Cancelled),
                    permit = semaphore.acquire_owned() => {
                        permit.map_err(|_| ExtractError::Cancelled)?
                    }
                };

                let work = extract_unit(extractor.as_ref(), &path, &tree_id, &unit_id);
                tokio::select! {
                    _ = cancel.cancelled() => Err(ExtractError::Cancelled),
                    res = tokio::time::timeout(timeout, work) => match res {
                        Ok(result) => result,
                        Err(_) => Err(ExtractError::Timeout(timeout)),
                    },
                }
            });

            handles.push((unit.clone(), handle));
        }

        for (unit, handle) in handles {
            match handle.await {
                Ok(Ok(chunks)) => {
                    debug!("Extracted {} chunks from {}", chunks.len(), unit);
                    outcome.results.insert(unit, chunks);
                }
                Ok(Err(ExtractError::Cancelled)) if cancel.is_cancelled() => {
                    outcome.cancelled = true;
                }
                Ok(Err(e)) => {
                    warn!("Failed to extract {}: {}", unit, e);
                    outcome.failures.push(UnitFailure {
                        unit,
                        error: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!("Extraction task for {} did not complete: {}", unit, e);
                    outcome.failures.push(UnitFailure {
                        unit,
                        error: format!("task failed: {}", e),
                    });
                }
            }
        }

        if cancel.is_cancelled() {
            outcome.cancelled = true;
        }

        info!(
            "Dispatch finished: {} succeeded, {} failed{}",
            outcome.results.len(),
            outcome.failures.len(),
            if outcome.cancelled { ", cancelled" } else { "" }
        );
        outcome
    }
}

/// Read one unit, extract it and number its chunks.
async fn extract_unit<X: UnitExtractor + ?Sized>(
    extractor: &X,
    path: &Path,
    tree_id: &str,
    unit: &str,
) -> Result<Vec<Chunk>, ExtractError> {
    let bytes = tokio::fs::read(path).await?;
    let content = String::from_utf8_lossy(&bytes);
    let lang = detect_language(unit);

    let spans = extractor.extract(unit, &content, lang).await?;

    Ok(spans
        .into_iter()
        .enumerate()
        .map(|(ordinal, span)| Chunk {
            tree_id: tree_id.to_string(),
            file_path: unit.to_string(),
            chunk_id: Chunk::make_id(unit, ordinal),
            ordinal,
            lang: lang.to_string(),
            start_line: span.start_line,
            end_line: span.end_line,
            content: span.content.trim_end().to_string(),
            summary: span.summary,
            keywords: span.keywords,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::extract::ExtractedSpan;
    use async_trait::async_trait;
    use std::fs;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Emits one span per line; fails on units containing "fail" and
    /// reports `Cancelled` for units containing "abandon".
    struct LineExtractor {
        active: AtomicUsize,
        peak: AtomicUsize,
        delay: Duration,
    }

    impl LineExtractor {
        fn new(delay: Duration) -> Self {
            Self {
                active: AtomicUsize::new(0),
                peak: AtomicUsize::new(0),
                delay,
            }
        }
    }

    #[async_trait]
    impl UnitExtractor for LineExtractor {
        async fn extract(
            &self,
            unit: &str,
            content: &str,
            _lang: &str,
        ) -> Result<Vec<ExtractedSpan>, ExtractError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.active.fetch_sub(1, Ordering::SeqCst);

            if unit.contains("fail") {
                return Err(ExtractError::Enrichment("boom".to_string()));
            }
            if unit.contains("abandon") {
                return Err(ExtractError::Cancelled);
            }
            Ok(content
                .lines()
                .enumerate()
                .map(|(i, line)| ExtractedSpan {
                    content: format!("{}  ", line),
                    start_line: Some(i + 1),
                    end_line: Some(i + 1),
                    summary: String::new(),
                    keywords: Vec::new(),
                })
                .collect())
        }
    }

    fn write_units(root: &Path, units: &[(&str, &str)]) -> Vec<String> {
        for (unit, body) in units {
            let path = root.join(unit);
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent).unwrap();
            }
            fs::write(path, body).unwrap();
        }
        units.iter().map(|(u, _)| u.to_string()).collect()
    }

    #[tokio::test]
    async fn test_dispatch_assigns_sequential_ordinals() {
        let dir = tempdir().unwrap();
        let units = write_units(dir.path(), &[("src/a.py", "one\ntwo\nthree")]);
        let dispatcher = Dispatcher::new(
            Arc::new(LineExtractor::new(Duration::ZERO)),
            DispatchConfig::default(),
        );

        let outcome = dispatcher
            .dispatch(dir.path(), "repo", &units, &CancellationToken::new())
            .await;

        let chunks = &outcome.results["src/a.py"];
        assert_eq!(chunks.len(), 3);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.ordinal, i);
            assert_eq!(chunk.chunk_id, format!("src/a.py-{}", i));
            assert_eq!(chunk.tree_id, "repo");
            assert_eq!(chunk.lang, "python");
        }
        // trailing whitespace is trimmed
        assert_eq!(chunks[0].content, "one");
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let dir = tempdir().unwrap();
        let units = write_units(
            dir.path(),
            &[("ok1.py", "a"), ("fail.py", "b"), ("ok2.py", "c")],
        );
        let dispatcher = Dispatcher::new(
            Arc::new(LineExtractor::new(Duration::ZERO)),
            DispatchConfig::default(),
        );

        let outcome = dispatcher
            .dispatch(dir.path(), "repo", &units, &CancellationToken::new())
            .await;

        assert_eq!(outcome.results.len(), 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit, "fail.py");
        assert!(!outcome.cancelled);
    }

    #[tokio::test]
    async fn test_missing_file_is_a_unit_failure() {
        let dir = tempdir().unwrap();
        let dispatcher = Dispatcher::new(
            Arc::new(LineExtractor::new(Duration::ZERO)),
            DispatchConfig::default(),
        );

        let outcome = dispatcher
            .dispatch(
                dir.path(),
                "repo",
                &["gone.py".to_string()],
                &CancellationToken::new(),
            )
            .await;

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failed_units().len(), 1);
    }

    #[tokio::test]
    async fn test_parallelism_is_bounded() {
        let dir = tempdir().unwrap();
        let files: Vec<(String, &str)> = (0..8).map(|i| (format!("f{}.py", i), "x")).collect();
        let refs: Vec<(&str, &str)> = files.iter().map(|(u, b)| (u.as_str(), *b)).collect();
        let units = write_units(dir.path(), &refs);

        let extractor = Arc::new(LineExtractor::new(Duration::from_millis(30)));
        let dispatcher = Dispatcher::new(
            extractor.clone(),
            DispatchConfig {
                workers: 2,
                unit_timeout: Duration::from_secs(5),
            },
        );

        let outcome = dispatcher
            .dispatch(dir.path(), "repo", &units, &CancellationToken::new())
            .await;

        assert_eq!(outcome.results.len(), 8);
        assert!(extractor.peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn test_timeout_fails_unit() {
        let dir = tempdir().unwrap();
        let units = write_units(dir.path(), &[("slow.py", "x")]);
        let dispatcher = Dispatcher::new(
            Arc::new(LineExtractor::new(Duration::from_secs(5))),
            DispatchConfig {
                workers: 1,
                unit_timeout: Duration::from_millis(20),
            },
        );

        let outcome = dispatcher
            .dispatch(dir.path(), "repo", &units, &CancellationToken::new())
            .await;

        assert!(outcome.results.is_empty());
        assert_eq!(outcome.failures[0].error, "Unit timed out after 20ms");
    }

    #[tokio::test]
    async fn test_unit_cancelled_without_token_is_a_failure() {
        let dir = tempdir().unwrap();
        let units = write_units(dir.path(), &[("a.py", "x"), ("abandon.py", "y")]);
        let dispatcher = Dispatcher::new(
            Arc::new(LineExtractor::new(Duration::ZERO)),
            DispatchConfig::default(),
        );

        let outcome = dispatcher
            .dispatch(dir.path(), "repo", &units, &CancellationToken::new())
            .await;

        assert!(!outcome.cancelled);
        assert_eq!(outcome.results["a.py"].len(), 1);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].unit, "abandon.py");
    }

    #[tokio::test]
    async fn test_cancellation_marks_outcome() {
        let dir = tempdir().unwrap();
        let units = write_units(dir.path(), &[("a.py", "x"), ("b.py", "y")]);
        let dispatcher = Dispatcher::new(
            Arc::new(LineExtractor::new(Duration::from_secs(5))),
            DispatchConfig {
                workers: 1,
                unit_timeout: Duration::from_secs(30),
            },
        );

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let outcome = dispatcher.dispatch(dir.path(), "repo", &units, &cancel).await;
        assert!(outcome.cancelled);
        assert!(outcome.results.is_empty());
    }
}
