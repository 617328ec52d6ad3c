//! Chunk manifest and retract-and-replace reconciliation.
//!
//! The manifest is the full current collection of chunks for one source
//! tree. Reconciliation replaces every chunk owned by an affected unit and
//! carries all other chunks forward untouched.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::chunk::Chunk;

/// Every chunk currently derived from a source tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Manifest {
    pub chunks: Vec<Chunk>,
}

impl Manifest {
    pub fn new(chunks: Vec<Chunk>) -> Self {
        Self { chunks }
    }

    /// Distinct units that own at least one chunk.
    pub fn units(&self) -> BTreeSet<&str> {
        self.chunks.iter().map(|c| c.file_path.as_str()).collect()
    }

    /// Chunks owned by `unit`, in manifest order.
    pub fn chunks_for<'a>(&'a self, unit: &'a str) -> impl Iterator<Item = &'a Chunk> + 'a {
        self.chunks.iter().filter(move |c| c.file_path == unit)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

/// Result of reconciling one run's extraction results into the manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    /// Identities of previous chunks owned by affected units
    pub retract_ids: Vec<String>,
    /// Newly produced chunks to add to the index
    pub inserted: Vec<Chunk>,
    /// The manifest after replacement
    pub next: Manifest,
}

/// Retract every previous chunk whose unit is in `affected` and append the
/// freshly produced chunks for those units.
///
/// `affected` holds changed, new and deleted units plus the tree unit when
/// the listing changed. Units in `affected` with no entry in `produced`
/// (deleted or failed) simply lose their chunks. Entries in `produced` for
/// units outside `affected` are ignored.
pub fn reconcile(
    previous: &Manifest,
    affected: &BTreeSet<String>,
    produced: &BTreeMap<String, Vec<Chunk>>,
) -> Reconciliation {
    let mut retract_ids = Vec::new();
    let mut kept = Vec::with_capacity(previous.len());

    for chunk in &previous.chunks {
        if affected.contains(&chunk.file_path) {
            retract_ids.push(chunk.chunk_id.clone());
        } else {
            kept.push(chunk.clone());
        }
    }

    let inserted: Vec<Chunk> = produced
        .iter()
        .filter(|(unit, _)| affected.contains(unit.as_str()))
        .flat_map(|(_, chunks)| chunks.iter().cloned())
        .collect();

    kept.extend(inserted.iter().cloned());

    Reconciliation {
        retract_ids,
        inserted,
        next: Manifest::new(kept),
    }
}
