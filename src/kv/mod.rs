//! Defines the contract of the persistent tier behind a [Cache](crate::memkv::Cache).
//!
//! A [KvStore] is a pluggable backend which stores one payload (and its expiry) per record. The
//! cache treats all implementations uniformly. Three implementations are provided:
//!
//! * [MemoryStore](memory::MemoryStore): keeps everything in process and records every invocation.
//!   This is mainly used in tests but can also serve as a stand-in in single process setups.
//! * **RedisStore** (feature `redis-backend`): one Redis key per record using native key TTLs.
//! * **PostgresStore** (feature `postgres-backend`): one table per record type with an explicit
//!   `expire_at` column which is purged by the GC of the cache.
//!
//! # Errors
//!
//! All failures of the underlying system are reported as
//! [CacheError::StoreFailure](crate::error::CacheError::StoreFailure). A missing entry is not an
//! error for [KvStore::get] or [KvStore::update] (these return `None`), but it is for
//! [KvStore::compare_and_delete] which reports [CacheError::NotFound](crate::error::CacheError::NotFound).
use async_trait::async_trait;

use crate::error::CacheResult;
use crate::memkv::{ConsistentRecord, Record};

pub mod memory;
#[cfg(feature = "postgres-backend")]
pub mod postgres;
#[cfg(feature = "redis-backend")]
pub mod redis;

pub use memory::MemoryStore;
#[cfg(feature = "postgres-backend")]
pub use self::postgres::{PostgresConfig, PostgresStore};
#[cfg(feature = "redis-backend")]
pub use self::redis::{RedisConfig, RedisStore};

/// Represents a serialized payload along with its absolute expiry.
///
/// This is what both tiers store per composite key. An **expire_at** of zero means that the
/// entry never expires.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredValue {
    /// The opaque payload as produced by [Record::value].
    pub payload: String,
    /// The absolute expiry in Unix seconds.
    pub expire_at: i64,
}

impl StoredValue {
    /// Creates a new value.
    pub fn new(payload: impl Into<String>, expire_at: i64) -> Self {
        StoredValue {
            payload: payload.into(),
            expire_at,
        }
    }

    /// Captures the current payload and expiry of the given record.
    pub fn of(record: &dyn Record) -> anyhow::Result<Self> {
        Ok(StoredValue {
            payload: record.value()?,
            expire_at: record.expire_at(),
        })
    }

    /// Determines if this value is expired at the given time.
    pub fn is_expired(&self, now: i64) -> bool {
        crate::clock::is_expired(self.expire_at, now)
    }
}

/// Represents a row returned by a prefix scan.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StoredRow {
    /// The primary key of the record (without the table name).
    pub primary_key: String,
    /// The stored payload and expiry.
    pub value: StoredValue,
}

/// Decides whether the value currently stored equals the one the caller expects.
///
/// Used by [KvStore::compare_and_delete]. Errors (e.g. a payload which cannot be unmarshalled)
/// abort the operation.
pub type Matcher<'a> = dyn Fn(&StoredValue) -> CacheResult<bool> + Send + Sync + 'a;

/// Describes a persistent tier.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Returns a short name used in log messages.
    fn name(&self) -> &str;

    /// Stores the payload of the given record.
    ///
    /// The record already carries its absolute expiry. Stores with native TTL support use
    /// **ttl_seconds** instead (0 = no expiry).
    async fn set(&self, record: &dyn Record, ttl_seconds: u64) -> CacheResult<()>;

    /// Fetches the payload stored for the given record (only its identity is used).
    async fn get(&self, record: &dyn Record) -> CacheResult<Option<StoredValue>>;

    /// Replaces the payload of an existing entry while keeping its expiry.
    ///
    /// Returns the preserved absolute expiry or `None` if there is no such entry.
    async fn update(&self, record: &dyn Record) -> CacheResult<Option<i64>>;

    /// Lists all entries of the prototype's table whose primary key starts with the primary key
    /// of the prototype.
    async fn list_with_key_prefix(
        &self,
        prototype: &dyn ConsistentRecord,
    ) -> CacheResult<Vec<StoredRow>>;

    /// Purges all expired entries of the prototype's table.
    async fn delete_expired(&self, prototype: &dyn Record) -> CacheResult<()>;

    /// Deletes the entry of the given record if the **matcher** accepts the stored value.
    ///
    /// Returns `true` only if the value accepted by the matcher is the one which got deleted.
    /// Fails with [NotFound](crate::error::CacheError::NotFound) if there is no such entry.
    async fn compare_and_delete(
        &self,
        record: &dyn Record,
        matcher: &Matcher<'_>,
    ) -> CacheResult<bool>;
}
