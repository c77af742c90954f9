//! Provides the in-process tier of the cache.
//!
//! A [MemIndex] maps composite keys to [StoredValue]s. All operations are atomic per key and
//! never block on anything but the shard which contains the key. There is no global lock, neither
//! for writes nor while iterating.
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::kv::StoredValue;

/// A concurrent mapping from composite key to stored value.
#[derive(Default)]
pub struct MemIndex {
    entries: DashMap<String, StoredValue>,
}

impl MemIndex {
    /// Creates an empty index.
    pub fn new() -> Self {
        MemIndex {
            entries: DashMap::new(),
        }
    }

    /// Atomically replaces the entry for the given key and returns the previous value, if any.
    pub fn swap(&self, key: &str, value: StoredValue) -> Option<StoredValue> {
        self.entries.insert(key.to_owned(), value)
    }

    /// Returns a copy of the value stored for the given key.
    pub fn load(&self, key: &str) -> Option<StoredValue> {
        self.entries.get(key).map(|entry| entry.value().clone())
    }

    /// Stores the given value unless the key is already present.
    ///
    /// Returns the value which is present after the call along with a flag which indicates if it
    /// was already present before (**true**) or if the given value was stored (**false**).
    pub fn load_or_store(&self, key: &str, value: StoredValue) -> (StoredValue, bool) {
        match self.entries.entry(key.to_owned()) {
            Entry::Occupied(entry) => (entry.get().clone(), true),
            Entry::Vacant(entry) => {
                let _ = entry.insert(value.clone());
                (value, false)
            }
        }
    }

    /// Determines if an entry exists for the given key.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Atomically replaces the payload of an existing entry while keeping its expiry.
    ///
    /// Returns the expiry of the entry or `None` if there is no entry for the given key.
    pub fn replace_payload(&self, key: &str, payload: String) -> Option<i64> {
        self.entries.get_mut(key).map(|mut entry| {
            entry.payload = payload;
            entry.expire_at
        })
    }

    /// Removes the entry for the given key if present.
    pub fn delete(&self, key: &str) -> Option<StoredValue> {
        self.entries.remove(key).map(|(_, value)| value)
    }

    /// Removes the entry for the given key, but only if it still holds the expected value.
    pub fn compare_and_delete(&self, key: &str, expected: &StoredValue) -> bool {
        self.entries
            .remove_if(key, |_, value| value == expected)
            .is_some()
    }

    /// Invokes the visitor for each entry until it returns **false**.
    ///
    /// The visitor operates on a snapshot, therefore no lock is held while it runs and it may
    /// freely modify the index (including deleting the entry it is looking at). The visit order is
    /// unspecified.
    pub fn range<F>(&self, mut visitor: F)
    where
        F: FnMut(&str, &StoredValue) -> bool,
    {
        let snapshot: Vec<(String, StoredValue)> = self
            .entries
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        for (key, value) in snapshot {
            if !visitor(&key, &value) {
                return;
            }
        }
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Determines if the index is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Removes all entries.
    pub fn clear(&self) {
        self.entries.clear();
    }
}
