//! Source tree enumeration.
//!
//! Directories excluded by the ignore rules (or control directories such
//! as `.git`) are pruned before descent. Files with a binary extension are
//! skipped regardless of the rules. Every remaining file becomes a unit
//! whose identity is its root-relative path with `/` separators.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::fingerprint::{fingerprint, fingerprint_file, TreeListing};
use crate::ignore_rules::{IgnoreRules, CONTROL_DIRS};

/// Extensions that are always skipped.
pub const DEFAULT_BINARY_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "exe", "dll", "bin"];

/// Result of enumerating and fingerprinting a source tree.
#[derive(Debug, Clone, Default)]
pub struct ScanOutcome {
    /// Unit identity -> content digest.
    pub units: BTreeMap<String, String>,
    /// Canonical rendering of the directory structure.
    pub tree_listing: String,
    /// Digest of `tree_listing`.
    pub tree_digest: String,
    /// Units that were seen but could not be read.
    pub unreadable: BTreeSet<String>,
}

/// Convert a root-relative path into a unit identity.
pub fn unit_identity(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn is_binary(path: &Path, binary_extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|ext| binary_extensions.iter().any(|b| b.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

/// Decide whether the walker may yield (and, for directories, descend into) an entry.
fn keep_entry(entry: &DirEntry, root: &Path, rules: &dyn IgnoreRules) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let is_dir = entry.file_type().is_dir();
    if is_dir {
        if let Some(name) = entry.file_name().to_str() {
            if CONTROL_DIRS.contains(&name) {
                return false;
            }
        }
    }
    let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
    !rules.is_ignored(relative, is_dir)
}

/// Enumerate `root`, fingerprint every unit and render the directory listing.
pub fn scan_tree(root: &Path, rules: &dyn IgnoreRules, binary_extensions: &[String]) -> ScanOutcome {
    let mut outcome = ScanOutcome::default();
    let mut listing = TreeListing::new();

    let walker = WalkDir::new(root)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| keep_entry(e, root, rules));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                if let Some(path) = e.path() {
                    if let Ok(relative) = path.strip_prefix(root) {
                        if !relative.as_os_str().is_empty() {
                            outcome.unreadable.insert(unit_identity(relative));
                        }
                    }
                }
                continue;
            }
        };
        if entry.depth() == 0 {
            continue;
        }

        let path = entry.path();
        let relative = path.strip_prefix(root).unwrap_or(path);
        let file_type = entry.file_type();

        if file_type.is_dir() {
            listing.add(relative, true);
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        listing.add(relative, false);
        if is_binary(path, binary_extensions) {
            continue;
        }

        let identity = unit_identity(relative);
        match fingerprint_file(path) {
            Ok(digest) => {
                outcome.units.insert(identity, digest);
            }
            Err(e) => {
                warn!("Skipping unreadable file {:?}: {}", path, e);
                outcome.unreadable.insert(identity);
            }
        }
    }

    outcome.tree_listing = listing.render();
    outcome.tree_digest = fingerprint(outcome.tree_listing.as_bytes());
    debug!(
        "Scanned {:?}: {} units, {} unreadable",
        root,
        outcome.units.len(),
        outcome.unreadable.len()
    );
    outcome
}
