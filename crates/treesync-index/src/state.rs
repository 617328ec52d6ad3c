//! Persisted per-tree state: the fingerprint cache and the chunk manifest.
//!
//! Both artifacts live in one data directory, keyed by a [`TreeId`]:
//! `<tree_id>_cache.json` and `<tree_id>_chunks.json`. Every write goes to
//! a temp file in the same directory which is then renamed over the
//! target, so a reader never sees a half-written file.

use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;
use tracing::{debug, info};

use crate::cache::FingerprintCache;
use crate::error::StateError;
use crate::manifest::Manifest;

/// Stable identifier of a source tree, safe to use in file names.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeId(String);

impl TreeId {
    /// Use `id` as given, after sanitising it.
    pub fn new(id: &str) -> Self {
        let clean: String = id
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        if clean.is_empty() {
            Self("tree".to_string())
        } else {
            Self(clean)
        }
    }

    /// Derive an id from a path or repository URL: the last non-empty
    /// segment with any `.git` suffix removed.
    pub fn from_source(location: &str) -> Self {
        let segment = location
            .trim_end_matches(['/', '\\'])
            .rsplit(['/', '\\', ':'])
            .find(|s| !s.is_empty())
            .unwrap_or("");
        let segment = segment.strip_suffix(".git").unwrap_or(segment);
        Self::new(segment)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TreeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Loads and saves the cache and manifest for any tree under `data_dir`.
#[derive(Debug, Clone)]
pub struct StateStore {
    data_dir: PathBuf,
}

impl StateStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn cache_path(&self, tree: &TreeId) -> PathBuf {
        self.data_dir.join(format!("{}_cache.json", tree))
    }

    pub fn manifest_path(&self, tree: &TreeId) -> PathBuf {
        self.data_dir.join(format!("{}_chunks.json", tree))
    }

    /// Load the fingerprint cache; absent means empty.
    pub fn load_cache(&self, tree: &TreeId) -> Result<FingerprintCache, StateError> {
        read_json_or_default(&self.cache_path(tree))
    }

    /// Load the chunk manifest; absent means empty.
    pub fn load_manifest(&self, tree: &TreeId) -> Result<Manifest, StateError> {
        read_json_or_default(&self.manifest_path(tree))
    }

    /// Persist the manifest, then the cache.
    ///
    /// If the process dies between the two writes the old cache still
    /// marks the affected units as changed, so the next run redoes them.
    pub fn save(
        &self,
        tree: &TreeId,
        manifest: &Manifest,
        cache: &FingerprintCache,
    ) -> Result<(), StateError> {
        std::fs::create_dir_all(&self.data_dir).map_err(|source| StateError::Io {
            path: self.data_dir.clone(),
            source,
        })?;

        write_json_atomic(&self.manifest_path(tree), manifest)?;
        write_json_atomic(&self.cache_path(tree), cache)?;

        info!(
            "Saved state for {}: {} chunks, {} cached units",
            tree,
            manifest.len(),
            cache.len()
        );
        Ok(())
    }
}

fn read_json_or_default<T: DeserializeOwned + Default>(path: &Path) -> Result<T, StateError> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("No state at {}, starting empty", path.display());
            return Ok(T::default());
        }
        Err(source) => {
            return Err(StateError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_str(&content).map_err(|source| StateError::Parse {
        path: path.to_path_buf(),
        source,
    })
}

/// Serialize `value` to a sibling temp file and rename it over `path`.
pub(crate) fn write_json_atomic<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> Result<(), StateError> {
    let content = serde_json::to_vec_pretty(value).map_err(StateError::Serialize)?;
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let io_err = |source| StateError::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut tmp = NamedTempFile::new_in(dir).map_err(io_err)?;
    tmp.write_all(&content).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.persist(path).map_err(|e| StateError::Persist {
        path: path.to_path_buf(),
        source: e.error,
    })?;
    Ok(())
}
