//! Change detection between the previous fingerprint cache and a fresh scan.

use std::collections::BTreeSet;

use crate::cache::FingerprintCache;
use crate::scan::ScanOutcome;
use crate::TREE_UNIT;

/// Partition of units into changed-or-new, deleted and unchanged.
///
/// The directory-structure unit never appears in the three lists; its
/// change is reported through `tree_changed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    pub changed_or_new: Vec<String>,
    pub deleted: Vec<String>,
    pub unchanged: Vec<String>,
    pub tree_changed: bool,
}

impl ChangeSet {
    /// Compare `previous` against a fresh scan.
    ///
    /// A unit that could not be read, or that lives under a directory that
    /// could not be read, keeps its previous status: it counts as unchanged
    /// if it was cached, and is ignored otherwise.
    pub fn detect(previous: &FingerprintCache, scan: &ScanOutcome) -> Self {
        let mut changes = ChangeSet::default();

        for (unit, digest) in &scan.units {
            if unit == TREE_UNIT {
                continue;
            }
            match previous.get(unit) {
                Some(old) if old == digest => changes.unchanged.push(unit.clone()),
                _ => changes.changed_or_new.push(unit.clone()),
            }
        }

        for unit in previous.units() {
            if unit == TREE_UNIT || scan.units.contains_key(unit) {
                continue;
            }
            if is_shielded(unit, &scan.unreadable) {
                changes.unchanged.push(unit.to_string());
            } else {
                changes.deleted.push(unit.to_string());
            }
        }

        changes.tree_changed = previous.get(TREE_UNIT) != Some(scan.tree_digest.as_str());
        changes.unchanged.sort();
        changes
    }

    /// True when nothing needs to be done.
    pub fn is_empty(&self) -> bool {
        self.changed_or_new.is_empty() && self.deleted.is_empty() && !self.tree_changed
    }

    /// Units whose previous chunks must be retracted.
    pub fn affected(&self) -> BTreeSet<String> {
        let mut affected: BTreeSet<String> = self
            .changed_or_new
            .iter()
            .chain(self.deleted.iter())
            .cloned()
            .collect();
        if self.tree_changed {
            affected.insert(TREE_UNIT.to_string());
        }
        affected
    }

    /// Build the cache to persist after a successful run.
    ///
    /// Units in `failed` are left out so the next run retries them.
    /// Unreadable units, and units under unreadable directories, keep the
    /// digest they had before.
    pub fn next_cache(
        previous: &FingerprintCache,
        scan: &ScanOutcome,
        failed: &BTreeSet<String>,
    ) -> FingerprintCache {
        let mut next: FingerprintCache = scan
            .units
            .iter()
            .filter(|(unit, _)| !failed.contains(*unit))
            .map(|(unit, digest)| (unit.clone(), digest.clone()))
            .collect();

        for (unit, old) in previous.iter() {
            if unit != TREE_UNIT
                && !scan.units.contains_key(unit)
                && is_shielded(unit, &scan.unreadable)
            {
                next.insert(unit, old);
            }
        }

        next.insert(TREE_UNIT, scan.tree_digest.clone());
        next
    }
}

/// True when `unit` or one of its ancestor directories could not be read.
fn is_shielded(unit: &str, unreadable: &BTreeSet<String>) -> bool {
    if unreadable.contains(unit) {
        return true;
    }
    unit.match_indices('/').any(|(i, _)| unreadable.contains(&unit[..i]))
}
