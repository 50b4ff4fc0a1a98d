//! Exact-match sequence deduplication.

use std::collections::HashMap;

/// Id of the reserved empty sequence.
pub const PLACEHOLDER_ID: usize = 0;

/// Maps each distinct raw sequence to a stable integer id.
///
/// The dedup key is the raw tokens joined by a single space, so two
/// sequences are duplicates only if their strings match exactly. Id 0 is
/// reserved for the empty sequence and exists from construction.
#[derive(Debug, Clone)]
pub struct SequenceDeduplicator {
    str2idx: HashMap<String, usize>,
    indices: Vec<Vec<u32>>,
    tokens: Vec<Vec<String>>,
}

impl SequenceDeduplicator {
    pub fn new() -> Self {
        let mut dedup = Self {
            str2idx: HashMap::new(),
            indices: Vec::new(),
            tokens: Vec::new(),
        };
        dedup.clear();
        dedup
    }

    /// Canonical dedup key for a raw sequence.
    pub fn key<S: AsRef<str>>(raw: &[S]) -> String {
        raw.iter().map(AsRef::as_ref).collect::<Vec<_>>().join(" ")
    }

    /// Add a sequence, returning its id and whether it was newly minted.
    ///
    /// A previously seen sequence returns its existing id and leaves the
    /// table untouched, including the stored feature indices.
    pub fn add<S: AsRef<str>>(&mut self, raw: &[S], feature_indices: Vec<u32>) -> (usize, bool) {
        let key = Self::key(raw);
        if let Some(&id) = self.str2idx.get(&key) {
            return (id, false);
        }

        let id = self.indices.len();
        self.indices.push(feature_indices);
        self.tokens
            .push(raw.iter().map(|s| s.as_ref().to_string()).collect());
        self.str2idx.insert(key, id);
        (id, true)
    }

    /// Id of a raw sequence if it has been added.
    pub fn lookup<S: AsRef<str>>(&self, raw: &[S]) -> Option<usize> {
        self.str2idx.get(&Self::key(raw)).copied()
    }

    /// Feature indices stored for `id`.
    pub fn indices(&self, id: usize) -> Option<&[u32]> {
        self.indices.get(id).map(Vec::as_slice)
    }

    /// Raw tokens stored for `id`.
    pub fn tokens(&self, id: usize) -> Option<&[String]> {
        self.tokens.get(id).map(Vec::as_slice)
    }

    /// Iterate `(id, feature_indices)` in id order, placeholder included.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[u32])> {
        self.indices.iter().map(Vec::as_slice).enumerate()
    }

    /// Number of ids in the table, placeholder included.
    pub fn len(&self) -> usize {
        self.indices.len()
    }

    /// True when only the placeholder is present.
    pub fn is_empty(&self) -> bool {
        self.indices.len() <= 1
    }

    /// Drop every sequence except the placeholder.
    pub fn clear(&mut self) {
        self.str2idx.clear();
        self.indices.clear();
        self.tokens.clear();
        self.str2idx.insert(String::new(), PLACEHOLDER_ID);
        self.indices.push(Vec::new());
        self.tokens.push(Vec::new());
    }
}

impl Default for SequenceDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}
