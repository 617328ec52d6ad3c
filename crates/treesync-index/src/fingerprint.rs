//! Content fingerprints and the canonical directory-structure listing.
//!
//! A fingerprint depends only on bytes, never on timestamps or
//! permissions. The directory listing is rendered in a fixed order so
//! that enumeration order never shows up as a change.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::Read;
use std::path::{Component, Path};

use sha2::{Digest, Sha256};

/// Indentation per depth level in the rendered listing.
const INDENT: &str = "    ";

/// Compute the SHA-256 hex digest of a byte slice.
pub fn fingerprint(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Compute the SHA-256 hex digest of a file, reading it in 8 KiB blocks.
pub fn fingerprint_file(path: &Path) -> std::io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 8192];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Canonical textual rendering of a directory tree.
#[derive(Debug, Clone, Default)]
pub struct TreeListing {
    entries: BTreeSet<(Vec<String>, bool)>,
}

impl TreeListing {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry by its path relative to the root.
    pub fn add(&mut self, relative: &Path, is_dir: bool) {
        let parts: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(part) => Some(part.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if !parts.is_empty() {
            self.entries.insert((parts, is_dir));
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Render the listing. Component-wise ordering yields a pre-order walk
    /// with siblings sorted by name.
    pub fn render(&self) -> String {
        let mut out = String::from("./\n");
        for (parts, is_dir) in &self.entries {
            for _ in 0..parts.len() {
                out.push_str(INDENT);
            }
            // parts is never empty, see `add`
            out.push_str(&parts[parts.len() - 1]);
            if *is_dir {
                out.push('/');
            }
            out.push('\n');
        }
        out
    }
}
