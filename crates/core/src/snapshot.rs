//! Point-in-time view of a namespace.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// Immutable label/annotation map.
///
/// Entries are kept sorted by key with no duplicates, so lookups are a binary
/// search. [`KeyValues::get`] returns `None` for an absent key; an absent key
/// is never confused with a key whose value is the empty string.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyValues {
    entries: SmallVec<[(String, String); 8]>,
}

impl KeyValues {
    pub fn new() -> Self { Self::default() }

    /// Build from arbitrary pairs. When a key repeats, the last value wins.
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        let mut entries: SmallVec<[(String, String); 8]> = SmallVec::new();
        for (k, v) in pairs {
            let (k, v) = (k.into(), v.into());
            match entries.binary_search_by(|(ek, _)| ek.as_str().cmp(k.as_str())) {
                Ok(idx) => {
                    if let Some(slot) = entries.get_mut(idx) { slot.1 = v; }
                }
                Err(idx) => entries.insert(idx, (k, v)),
            }
        }
        Self { entries }
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .binary_search_by(|(k, _)| k.as_str().cmp(key))
            .ok()
            .and_then(|idx| self.entries.get(idx))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains_key(&self, key: &str) -> bool { self.get(key).is_some() }
    pub fn len(&self) -> usize { self.entries.len() }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for KeyValues {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self { Self::from_pairs(iter) }
}

/// Read-only namespace state as returned by the read collaborator.
///
/// A later reconcile fetches a fresh snapshot instead of mutating this one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NamespaceSnapshot {
    pub name: String,
    pub labels: KeyValues,
    pub annotations: KeyValues,
    /// Server resourceVersion, when the source provides one.
    pub resource_version: Option<String>,
}

impl NamespaceSnapshot {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into(), ..Self::default() }
    }

    pub fn with_labels(mut self, labels: KeyValues) -> Self {
        self.labels = labels;
        self
    }

    pub fn with_annotations(mut self, annotations: KeyValues) -> Self {
        self.annotations = annotations;
        self
    }
}
