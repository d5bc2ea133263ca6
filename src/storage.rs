use std::collections::HashMap;

use crate::key::Key;

/// A node's bucket: resource keys mapped to the identifier of the node serving them.
#[derive(Clone, Debug, Default)]
pub struct Bucket {
    data: HashMap<String, Key>,
}

impl Bucket {
    pub fn new() -> Self {
        Bucket {
            data: HashMap::new(),
        }
    }

    /// Upserts an entry. Returns the previous owner, if any.
    pub fn insert(&mut self, key: String, owner: Key) -> Option<Key> {
        self.data.insert(key, owner)
    }

    pub fn get(&self, key: &str) -> Option<Key> {
        self.data.get(key).cloned()
    }

    /// Returns every entry whose key hashes into the arc `(lo, hi]`.
    pub fn entries_in(&self, lo: &Key, hi: &Key) -> Vec<(String, Key)> {
        self.data
            .iter()
            .filter(|(key, _)| Key::hash(key.as_bytes()).between_inclusive_end(lo, hi))
            .map(|(key, owner)| (key.clone(), *owner))
            .collect()
    }

    /// Returns every entry whose key does not hash into the arc `(lo, hi]`.
    pub fn entries_outside(&self, lo: &Key, hi: &Key) -> Vec<(String, Key)> {
        self.data
            .iter()
            .filter(|(key, _)| !Key::hash(key.as_bytes()).between_inclusive_end(lo, hi))
            .map(|(key, owner)| (key.clone(), *owner))
            .collect()
    }

    pub fn entries(&self) -> Vec<(String, Key)> {
        self.data.iter().map(|(key, owner)| (key.clone(), *owner)).collect()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}
