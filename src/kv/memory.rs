//! Provides an in-process [KvStore] which records every invocation.
//!
//! Entries are kept in a plain map, guarded by a single mutex. Expired entries behave like rows
//! of a relational table: they remain visible until [KvStore::delete_expired] purges them.
//!
//! Next to serving as test double, the store can be switched "offline" via
//! [MemoryStore::set_available] so that each subsequent call fails with a store failure. This
//! permits to verify which operations are served by the memory tier alone.
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::clock;
use crate::error::{CacheError, CacheResult};
use crate::kv::{KvStore, Matcher, StoredRow, StoredValue};
use crate::memkv::{composite_key, primary_key_of, ConsistentRecord, Record};

/// Keeps all entries in memory and logs each call.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, StoredValue>>,
    calls: Mutex<Vec<String>>,
    offline: AtomicBool,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        MemoryStore::default()
    }

    /// Directly writes an entry, bypassing the invocation log.
    pub fn insert(&self, record: &dyn Record) -> anyhow::Result<()> {
        let value = StoredValue::of(record)?;
        let _ = self.entries.lock().insert(composite_key(record), value);
        Ok(())
    }

    /// Directly reads an entry, bypassing the invocation log.
    pub fn peek(&self, record: &dyn Record) -> Option<StoredValue> {
        self.entries.lock().get(&composite_key(record)).cloned()
    }

    /// Returns the number of stored entries.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Determines if the store is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Returns the names of all operations invoked so far (e.g. `get users_42`).
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    /// Returns the number of operations invoked so far.
    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Forgets all recorded invocations.
    pub fn reset_calls(&self) {
        self.calls.lock().clear();
    }

    /// Toggles whether the store answers requests or fails them.
    pub fn set_available(&self, available: bool) {
        self.offline.store(!available, Ordering::Release);
    }

    fn record_call(&self, operation: &str, key: &str) -> CacheResult<()> {
        self.calls.lock().push(format!("{} {}", operation, key));

        if self.offline.load(Ordering::Acquire) {
            Err(CacheError::store(anyhow::anyhow!(
                "memory store is offline ({} {})",
                operation,
                key
            )))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl KvStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn set(&self, record: &dyn Record, _ttl_seconds: u64) -> CacheResult<()> {
        let key = composite_key(record);
        self.record_call("set", &key)?;

        let value = StoredValue::of(record).map_err(CacheError::invalid_record)?;
        let _ = self.entries.lock().insert(key, value);

        Ok(())
    }

    async fn get(&self, record: &dyn Record) -> CacheResult<Option<StoredValue>> {
        let key = composite_key(record);
        self.record_call("get", &key)?;

        Ok(self.entries.lock().get(&key).cloned())
    }

    async fn update(&self, record: &dyn Record) -> CacheResult<Option<i64>> {
        let key = composite_key(record);
        self.record_call("update", &key)?;

        let payload = record.value().map_err(CacheError::invalid_record)?;
        let mut entries = self.entries.lock();
        match entries.get_mut(&key) {
            Some(value) => {
                value.payload = payload;
                Ok(Some(value.expire_at))
            }
            None => Ok(None),
        }
    }

    async fn list_with_key_prefix(
        &self,
        prototype: &dyn ConsistentRecord,
    ) -> CacheResult<Vec<StoredRow>> {
        let prefix = composite_key(prototype);
        self.record_call("list", &prefix)?;

        let table = prototype.table_name();
        Ok(self
            .entries
            .lock()
            .iter()
            .filter(|(key, _)| key.starts_with(&prefix))
            .filter_map(|(key, value)| {
                primary_key_of(table, key).map(|primary_key| StoredRow {
                    primary_key: primary_key.to_owned(),
                    value: value.clone(),
                })
            })
            .collect())
    }

    async fn delete_expired(&self, prototype: &dyn Record) -> CacheResult<()> {
        let table = prototype.table_name();
        self.record_call("delete_expired", table)?;

        let now = clock::now();
        self.entries.lock().retain(|key, value| {
            primary_key_of(table, key).is_none() || !value.is_expired(now)
        });

        Ok(())
    }

    async fn compare_and_delete(
        &self,
        record: &dyn Record,
        matcher: &Matcher<'_>,
    ) -> CacheResult<bool> {
        let key = composite_key(record);
        self.record_call("compare_and_delete", &key)?;

        let mut entries = self.entries.lock();
        let current = entries.get(&key).ok_or(CacheError::NotFound)?;
        if matcher(current)? {
            let _ = entries.remove(&key);
            Ok(true)
        } else {
            Ok(false)
        }
    }
}
