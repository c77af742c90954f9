//! Provides the write-through cache which couples a [MemIndex] with an optional [KvStore].
//!
//! Every mutation is first applied to the memory tier and then forwarded to the persistent tier
//! (if one is bound). Reads are served from memory and fall through to the persistent tier on a
//! miss, in which case the loaded value is put into memory again.
//!
//! Note that writes are not atomic across both tiers: if the persistent tier fails, the memory
//! tier keeps the newer value and the error is reported to the caller. The next write of the same
//! key will try again.
//!
//! # Expiry
//!
//! Each entry carries an absolute expiry in Unix seconds (zero means "never"). Expired entries
//! are never handed out by [Cache::get] (which reports [CacheError::Expired] instead) and are
//! eventually removed by the garbage collector, which runs every
//! [gc_interval](crate::config::CacheConfig::gc_interval).
//!
//! # Examples
//!
//! ```
//! # use pkgx::memkv::{Cache, Record};
//! # use pkgx::config::CacheConfig;
//! # use tokio_util::sync::CancellationToken;
//! # #[derive(Clone)]
//! # struct Counter { name: String, count: u32, expire_at: i64 }
//! # impl Record for Counter {
//! #     fn table_name(&self) -> &str { "counters" }
//! #     fn primary_key(&self) -> String { self.name.clone() }
//! #     fn value(&self) -> anyhow::Result<String> { Ok(self.count.to_string()) }
//! #     fn unmarshal(&mut self, payload: &str) -> anyhow::Result<()> {
//! #         self.count = payload.parse()?;
//! #         Ok(())
//! #     }
//! #     fn expire_at(&self) -> i64 { self.expire_at }
//! #     fn set_expire_at(&mut self, expire_at: i64) { self.expire_at = expire_at; }
//! # }
//! #[tokio::main]
//! async fn main() {
//!     // A cache without persistent tier...
//!     let cache = Cache::new(None, CacheConfig::default(), CancellationToken::new());
//!
//!     let mut counter = Counter { name: "visits".to_owned(), count: 42, expire_at: 0 };
//!     cache.set(&mut counter, 60).await.unwrap();
//!
//!     let filter = Counter { name: "visits".to_owned(), count: 0, expire_at: 0 };
//!     assert_eq!(cache.get(filter).await.unwrap().count, 42);
//! }
//! ```
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::config::CacheConfig;
use crate::error::{CacheError, CacheResult};
use crate::kv::{KvStore, StoredValue};
use crate::memkv::index::MemIndex;
use crate::memkv::record::{composite_key, primary_key_of, ConsistentRecord, Record};

/// Counts the operations performed by a cache.
#[derive(Debug, Default)]
pub struct CacheStats {
    reads: AtomicU64,
    hits: AtomicU64,
    writes: AtomicU64,
    store_loads: AtomicU64,
    gc_evictions: AtomicU64,
}

impl CacheStats {
    /// Returns the number of [Cache::get] calls.
    pub fn reads(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Returns the number of reads served by the memory tier.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of reads which missed the memory tier.
    pub fn misses(&self) -> u64 {
        self.reads().saturating_sub(self.hits())
    }

    /// Returns the number of writes applied to the memory tier.
    pub fn writes(&self) -> u64 {
        self.writes.load(Ordering::Relaxed)
    }

    /// Returns the number of values loaded from the persistent tier into memory.
    pub fn store_loads(&self) -> u64 {
        self.store_loads.load(Ordering::Relaxed)
    }

    /// Returns the number of memory entries removed by the garbage collector.
    pub fn gc_evictions(&self) -> u64 {
        self.gc_evictions.load(Ordering::Relaxed)
    }

    /// Returns the hit rate in percent.
    pub fn hit_rate(&self) -> f32 {
        match self.reads() {
            0 => 0.,
            n => self.hits() as f32 / n as f32 * 100.,
        }
    }

    pub(crate) fn record_gc_evictions(&self, evictions: u64) {
        let _ = self.gc_evictions.fetch_add(evictions, Ordering::Relaxed);
    }

    fn record_read(&self, hit: bool) {
        let _ = self.reads.fetch_add(1, Ordering::Relaxed);
        if hit {
            let _ = self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_write(&self) {
        let _ = self.writes.fetch_add(1, Ordering::Relaxed);
    }

    fn record_store_load(&self) {
        let _ = self.store_loads.fetch_add(1, Ordering::Relaxed);
    }
}

/// Contains the state shared between a [Cache] and its garbage collector.
pub(crate) struct Inner {
    pub(crate) index: MemIndex,
    pub(crate) store: Option<Arc<dyn KvStore>>,
    pub(crate) prototypes: RwLock<Vec<Arc<dyn Record>>>,
    pub(crate) stats: CacheStats,
}

/// A write-through cache with TTL semantics.
///
/// A cache is safe to be used by any number of concurrent tasks (wrap it in an **Arc** to share
/// it). Dropping the cache stops its garbage collector.
pub struct Cache {
    inner: Arc<Inner>,
    shutdown: CancellationToken,
}

impl Cache {
    /// Creates a new cache which writes through to the given store (if any).
    ///
    /// The garbage collector is spawned as a tokio task which runs until either the given
    /// **lifecycle** token is cancelled or the cache is dropped. If no tokio runtime is available,
    /// or if GC is disabled in the config, no collector is started.
    pub fn new(
        store: Option<Arc<dyn KvStore>>,
        config: CacheConfig,
        lifecycle: CancellationToken,
    ) -> Self {
        let inner = Arc::new(Inner {
            index: MemIndex::new(),
            store,
            prototypes: RwLock::new(Vec::new()),
            stats: CacheStats::default(),
        });

        let shutdown = lifecycle.child_token();
        crate::memkv::gc::install(inner.clone(), config.gc_interval, shutdown.clone());

        Cache { inner, shutdown }
    }

    /// Determines if a persistent tier is bound.
    pub fn has_store(&self) -> bool {
        self.inner.store.is_some()
    }

    /// Registers a prototype of a record type, so that the garbage collector also purges the
    /// expired entries of its table on the persistent tier.
    ///
    /// Registering a second prototype for the same table has no effect.
    pub fn register<R: Record>(&self, prototype: R) {
        let mut prototypes = self.inner.prototypes.write();
        if prototypes
            .iter()
            .any(|known| known.table_name() == prototype.table_name())
        {
            return;
        }

        log::debug!("Registering table {} for GC...", prototype.table_name());
        prototypes.push(Arc::new(prototype));
    }

    /// Returns the names of all tables registered for GC.
    pub fn registered_tables(&self) -> Vec<String> {
        self.inner
            .prototypes
            .read()
            .iter()
            .map(|prototype| prototype.table_name().to_owned())
            .collect()
    }

    /// Stores the given record which will expire after **ttl_seconds** (0 = never).
    ///
    /// The absolute expiry is written into the record. If the persistent tier rejects the write,
    /// the previous expiry of the record is restored and the error is returned. The memory tier
    /// however keeps the new value.
    pub async fn set<R: Record>(&self, record: &mut R, ttl_seconds: u64) -> CacheResult<()> {
        let _ = self.write(record, ttl_seconds, false).await?;
        Ok(())
    }

    /// Behaves like [Cache::set] but reports if there was a previous value for the record.
    ///
    /// A previous value counts if it was present in either tier.
    pub async fn create_or_update<R: Record>(
        &self,
        record: &mut R,
        ttl_seconds: u64,
    ) -> CacheResult<bool> {
        self.write(record, ttl_seconds, true).await
    }

    async fn write<R: Record>(
        &self,
        record: &mut R,
        ttl_seconds: u64,
        check_store: bool,
    ) -> CacheResult<bool> {
        let key = composite_key(record);
        let previous_expire_at = record.expire_at();
        record.set_expire_at(clock::expire_at_after(ttl_seconds));

        let value = match StoredValue::of(record) {
            Ok(value) => value,
            Err(error) => {
                record.set_expire_at(previous_expire_at);
                return Err(CacheError::invalid_record(error));
            }
        };

        let previous = self.inner.index.swap(&key, value.clone());
        self.inner.stats.record_write();
        let mut existed = previous.is_some();

        if let Some(store) = &self.inner.store {
            if check_store && !existed {
                match store.get(&*record).await {
                    Ok(stored) => existed = stored.is_some(),
                    Err(error) => {
                        record.set_expire_at(previous_expire_at);
                        return Err(error);
                    }
                }
            }

            if previous.as_ref() != Some(&value) {
                if let Err(error) = store.set(&*record, ttl_seconds).await {
                    log::warn!(
                        "Failed to write {} to {}: {} - keeping the value in memory only.",
                        key,
                        store.name(),
                        error
                    );
                    record.set_expire_at(previous_expire_at);
                    return Err(error);
                }
            }
        }

        Ok(existed)
    }

    /// Replaces the value of an existing record while keeping its expiry.
    ///
    /// The preserved expiry is written into the record. Fails with [CacheError::NotFound] if
    /// the record is unknown to both tiers (or has already expired in memory).
    ///
    /// Unlike [Cache::set], an update with a bound persistent tier writes the tier first and the
    /// memory tier afterwards, as only the tier knows the remaining lifetime of its entry. A
    /// record which is only present in memory (as left behind by a [Cache::set] which the tier
    /// rejected) is written through with its remaining lifetime.
    pub async fn update<R: Record>(&self, record: &mut R) -> CacheResult<()> {
        let key = composite_key(record);

        match &self.inner.store {
            Some(store) => {
                let expire_at = match store.update(&*record).await? {
                    Some(expire_at) => expire_at,
                    None => self.write_memory_only_entry(&key, record, store).await?,
                };
                record.set_expire_at(expire_at);
                let value = StoredValue::of(record).map_err(CacheError::invalid_record)?;
                let _ = self.inner.index.swap(&key, value);
            }
            None => {
                let payload = record.value().map_err(CacheError::invalid_record)?;
                let expire_at = self
                    .inner
                    .index
                    .replace_payload(&key, payload)
                    .ok_or(CacheError::NotFound)?;
                record.set_expire_at(expire_at);
            }
        }

        self.inner.stats.record_write();
        Ok(())
    }

    /// Writes a record, which the persistent tier doesn't know, through using the expiry of its
    /// memory entry.
    async fn write_memory_only_entry<R: Record>(
        &self,
        key: &str,
        record: &mut R,
        store: &Arc<dyn KvStore>,
    ) -> CacheResult<i64> {
        let now = clock::now();
        let expire_at = match self.inner.index.load(key) {
            Some(value) if !value.is_expired(now) => value.expire_at,
            _ => return Err(CacheError::NotFound),
        };

        // A finite expiry must not end up as "never expires" on the tier...
        let ttl_seconds = match clock::remaining_ttl(expire_at, now) {
            0 if expire_at != 0 => 1,
            ttl => ttl,
        };

        let previous_expire_at = record.expire_at();
        record.set_expire_at(expire_at);
        if let Err(error) = store.set(&*record, ttl_seconds).await {
            record.set_expire_at(previous_expire_at);
            return Err(error);
        }

        log::debug!("Wrote {} through to {} during an update.", key, store.name());
        Ok(expire_at)
    }

    /// Looks up the record identified by the given filter.
    ///
    /// The filter only needs to carry the identity (table name and primary key) of the record.
    /// It is filled with the stored value and expiry and then returned.
    ///
    /// # Errors
    /// * [CacheError::NotFound] if there is no such record in either tier
    /// * [CacheError::Expired] if the record is present but already expired
    /// * [CacheError::InvalidRecord] if the stored payload cannot be unmarshalled
    /// * [CacheError::StoreFailure] if the persistent tier failed on a memory miss
    pub async fn get<R: Record>(&self, mut filter: R) -> CacheResult<R> {
        let key = composite_key(&filter);

        let value = match self.inner.index.load(&key) {
            Some(value) => {
                self.inner.stats.record_read(true);
                value
            }
            None => {
                self.inner.stats.record_read(false);
                self.load_from_store(&key, &filter).await?
            }
        };

        if value.is_expired(clock::now()) {
            return Err(CacheError::Expired);
        }

        filter
            .unmarshal(&value.payload)
            .map_err(CacheError::invalid_record)?;
        filter.set_expire_at(value.expire_at);

        Ok(filter)
    }

    async fn load_from_store(&self, key: &str, filter: &dyn Record) -> CacheResult<StoredValue> {
        let store = self.inner.store.as_ref().ok_or(CacheError::NotFound)?;
        let loaded = store.get(filter).await?.ok_or(CacheError::NotFound)?;

        // A concurrent write which happened in the meantime wins...
        let (value, _) = self.inner.index.load_or_store(key, loaded);
        self.inner.stats.record_store_load();

        Ok(value)
    }

    /// Determines if a record exists in either tier.
    ///
    /// Note that this is a presence check: expired but not yet collected records are reported
    /// as present.
    pub async fn exist<R: Record>(&self, filter: &R) -> CacheResult<bool> {
        if self.inner.index.contains(&composite_key(filter)) {
            return Ok(true);
        }

        match &self.inner.store {
            Some(store) => Ok(store.get(filter).await?.is_some()),
            None => Ok(false),
        }
    }

    /// Lists all live records whose composite key starts with the composite key of the given
    /// prototype.
    ///
    /// Each result is a clone of the prototype into which the stored payload has been
    /// unmarshalled. If a record is present in both tiers, the memory tier wins. The order of the
    /// result is unspecified.
    pub async fn list_with_key_prefix<R: ConsistentRecord + Clone>(
        &self,
        prototype: &R,
    ) -> CacheResult<Vec<R>> {
        let prefix = composite_key(prototype);
        let table = prototype.table_name();

        let mut found: HashMap<String, StoredValue> = HashMap::new();
        self.inner.index.range(|key, value| {
            if key.starts_with(&prefix) {
                if let Some(primary_key) = primary_key_of(table, key) {
                    let _ = found.insert(primary_key.to_owned(), value.clone());
                }
            }
            true
        });

        if let Some(store) = &self.inner.store {
            for row in store.list_with_key_prefix(prototype).await? {
                let _ = found.entry(row.primary_key).or_insert(row.value);
            }
        }

        let now = clock::now();
        let mut result = Vec::with_capacity(found.len());
        for value in found.into_values().filter(|value| !value.is_expired(now)) {
            let mut record = prototype.clone();
            record
                .unmarshal(&value.payload)
                .map_err(CacheError::invalid_record)?;
            record.set_expire_at(value.expire_at);
            result.push(record);
        }

        Ok(result)
    }

    /// Deletes the given record, but only if the stored value is considered equal to it.
    ///
    /// The **equals** function receives the caller's record and the currently stored record (a
    /// clone of the caller's record into which the stored payload was unmarshalled). Returns
    /// **true** if the value which was compared is the one which got deleted, **false** if the
    /// values differ (or if the stored value changed while comparing). Fails with
    /// [CacheError::NotFound] if there is no such record.
    ///
    /// If a persistent tier is bound, the comparison runs there under its concurrency guard.
    /// Afterwards the memory entry is removed, unless it was replaced by a concurrent write in the
    /// meantime. Otherwise the memory tier is used directly.
    pub async fn compare_and_delete<R, F>(&self, record: &R, equals: F) -> CacheResult<bool>
    where
        R: Record + Clone,
        F: Fn(&R, &R) -> bool + Send + Sync,
    {
        let key = composite_key(record);
        let matcher = |stored: &StoredValue| -> CacheResult<bool> {
            let mut current = record.clone();
            current
                .unmarshal(&stored.payload)
                .map_err(CacheError::invalid_record)?;
            current.set_expire_at(stored.expire_at);
            Ok(equals(record, &current))
        };

        match &self.inner.store {
            Some(store) => {
                let before = self.inner.index.load(&key);
                let deleted = store.compare_and_delete(record, &matcher).await?;
                if let (true, Some(before)) = (deleted, before) {
                    let _ = self.inner.index.compare_and_delete(&key, &before);
                }
                Ok(deleted)
            }
            None => {
                let current = self.inner.index.load(&key).ok_or(CacheError::NotFound)?;
                if matcher(&current)? {
                    Ok(self.inner.index.compare_and_delete(&key, &current))
                } else {
                    Ok(false)
                }
            }
        }
    }

    /// Removes the given record from the memory tier only.
    ///
    /// The next read will consult the persistent tier again.
    pub fn remove<R: Record>(&self, record: &R) -> bool {
        self.inner.index.delete(&composite_key(record)).is_some()
    }

    /// Drops all entries of the memory tier. The persistent tier is left untouched.
    pub fn clear(&self) {
        log::debug!("Clearing {} entries from memory...", self.inner.index.len());
        self.inner.index.clear();
    }

    /// Runs a garbage collection immediately and returns the number of evicted memory entries.
    pub async fn collect_garbage(&self) -> usize {
        self.inner.collect_garbage().await
    }

    /// Returns the number of entries in the memory tier.
    pub fn len(&self) -> usize {
        self.inner.index.len()
    }

    /// Determines if the memory tier is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.index.is_empty()
    }

    /// Provides access to the usage counters.
    pub fn stats(&self) -> &CacheStats {
        &self.inner.stats
    }
}

impl Drop for Cache {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}
