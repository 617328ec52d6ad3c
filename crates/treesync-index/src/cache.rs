//! Fingerprint cache: unit identity to content digest, one per source tree.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Digest of every unit seen by the last successful run.
///
/// Absence of an entry means the unit is new; an entry with no
/// counterpart in the current scan means the unit was deleted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FingerprintCache {
    entries: BTreeMap<String, String>,
}

impl FingerprintCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, unit: &str) -> Option<&str> {
        self.entries.get(unit).map(|s| s.as_str())
    }

    /// Record a digest, replacing any previous one for the unit.
    pub fn insert(&mut self, unit: impl Into<String>, digest: impl Into<String>) {
        self.entries.insert(unit.into(), digest.into());
    }

    pub fn remove(&mut self, unit: &str) -> Option<String> {
        self.entries.remove(unit)
    }

    pub fn contains(&self, unit: &str) -> bool {
        self.entries.contains_key(unit)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn units(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(|k| k.as_str())
    }
}

impl FromIterator<(String, String)> for FingerprintCache {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        Self {
            entries: iter.into_iter().collect(),
        }
    }
}
