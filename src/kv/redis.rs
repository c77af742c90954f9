//! Provides a [KvStore] which keeps one Redis key per record.
//!
//! The key is the composite key of the record and the value is its payload. Expiry is handled by
//! Redis itself (via the native key TTL), therefore [KvStore::delete_expired] has nothing to do.
//!
//! We use the synchronous **redis** client and run each interaction on the blocking pool of tokio.
//! Connections are pooled by **r2d2**, which pings a connection before handing it out and discards
//! connections which have been closed.
//!
//! # Expiry
//!
//! Remaining lifetimes are read via **PTTL** and rounded up to full seconds. A key which is about
//! to expire (or which vanished between reading its payload and its TTL) is reported with an
//! expiry which has already passed (or passes within the current second). Only a key without
//! any TTL is reported as "never expires".
//!
//! # Compare and delete
//!
//! Uses optimistic concurrency: the key is **WATCH**ed, read and compared. If the comparison
//! succeeds, the key is deleted within **MULTI** / **EXEC**. If the key was modified in the
//! meantime, Redis aborts the transaction and the operation reports **false**. There is no retry.
//! Each **WATCH** is preceded by an **UNWATCH**, so that a connection which was returned to the
//! pool in the middle of this protocol cannot abort a later transaction.
//!
//! # Example
//!
//! ```no_run
//! # use pkgx::kv::{RedisConfig, RedisStore};
//! # use pkgx::memkv::Cache;
//! # use pkgx::config::CacheConfig;
//! # use std::sync::Arc;
//! # use tokio_util::sync::CancellationToken;
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::new(RedisConfig::from_url("redis://127.0.0.1:6379")).unwrap();
//!     let _cache = Cache::new(Some(Arc::new(store)), CacheConfig::default(), CancellationToken::new());
//! }
//! ```
use std::time::Duration;

use async_trait::async_trait;
use r2d2::Pool;
use redis::{Client, Connection, RedisResult};

use crate::clock;
use crate::error::{CacheError, CacheResult};
use crate::kv::{KvStore, Matcher, StoredRow, StoredValue};
use crate::memkv::{composite_key, primary_key_of, ConsistentRecord, Record};

/// Redis reports this TTL for keys which exist but have no expiry.
const NO_EXPIRY: i64 = -1;

type PooledConnection = r2d2::PooledConnection<Client>;

/// Configures a [RedisStore].
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// The connection URL like `redis://127.0.0.1:6379/0`.
    pub url: String,
    /// The maximal time to wait for a pooled connection.
    pub connect_timeout: Duration,
    /// The maximal number of connections kept by the pool.
    pub max_connections: u32,
    /// The **COUNT** hint used when scanning and the batch size for pipelined reads.
    pub scan_count: usize,
}

impl Default for RedisConfig {
    fn default() -> Self {
        RedisConfig {
            url: "redis://127.0.0.1:6379".to_owned(),
            connect_timeout: Duration::from_secs(5),
            max_connections: 8,
            scan_count: 100,
        }
    }
}

impl RedisConfig {
    /// Creates a config for the given URL using defaults for everything else.
    pub fn from_url(url: impl Into<String>) -> Self {
        RedisConfig {
            url: url.into(),
            ..Default::default()
        }
    }
}

/// Stores records in Redis.
pub struct RedisStore {
    pool: Pool<Client>,
    config: RedisConfig,
}

impl RedisStore {
    /// Creates a new store for the given config.
    ///
    /// Note that this doesn't connect yet, it only verifies the URL. Connections are established
    /// on demand.
    pub fn new(config: RedisConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str()).map_err(CacheError::store)?;
        let pool = Pool::builder()
            .max_size(config.max_connections.max(1))
            .min_idle(Some(0))
            .connection_timeout(config.connect_timeout)
            .build_unchecked(client);
        log::info!("Using Redis at {} as persistent tier.", config.url);

        Ok(RedisStore { pool, config })
    }

    /// Executes a blocking Redis query on the given (or a pooled) connection in an async fashion.
    ///
    /// Returns the connection along with the result, so that it can be used for subsequent
    /// queries. If the query fails, the connection goes back to the pool, which discards it if
    /// it has been closed.
    async fn blocking<T, Q>(
        &self,
        connection: Option<PooledConnection>,
        query: Q,
    ) -> CacheResult<(PooledConnection, T)>
    where
        Q: FnOnce(&mut Connection) -> RedisResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();

        tokio::task::spawn_blocking(move || -> anyhow::Result<(PooledConnection, T)> {
            let mut connection = match connection {
                Some(connection) => connection,
                None => pool.get()?,
            };
            let result = query(&mut *connection)?;
            Ok((connection, result))
        })
        .await
        .map_err(CacheError::store)?
        .map_err(CacheError::store)
    }

    /// Executes a single query using a pooled connection.
    async fn query<T, Q>(&self, query: Q) -> CacheResult<T>
    where
        Q: FnOnce(&mut Connection) -> RedisResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let (_, result) = self.blocking(None, query).await?;
        Ok(result)
    }

    async fn unwatch(&self, connection: PooledConnection) {
        if let Err(error) = self
            .blocking(Some(connection), |con| redis::cmd("UNWATCH").query::<()>(con))
            .await
        {
            log::warn!("Failed to UNWATCH a Redis connection: {}", error);
        }
    }
}

/// Escapes all characters which have a special meaning in a glob pattern as used by **SCAN**.
fn escape_glob(str: &str) -> String {
    let mut result = String::with_capacity(str.len() + 2);
    for ch in str.chars() {
        if matches!(ch, '*' | '?' | '[' | ']' | '\\') {
            result.push('\\');
        }
        result.push(ch);
    }

    result
}

/// Rounds a **PTTL** in milliseconds up to full seconds.
fn seconds_from_millis(millis: i64) -> i64 {
    millis / 1000 + i64::from(millis % 1000 > 0)
}

/// Converts the **PTTL** which Redis reported alongside a present payload into an absolute expiry.
///
/// A key which vanished after its payload was read reports -2 and yields an expiry in the past.
fn expiry_from_pttl(pttl: i64, now: i64) -> i64 {
    match pttl {
        NO_EXPIRY => 0,
        millis if millis >= 0 => now.saturating_add(seconds_from_millis(millis)),
        _ => now - 1,
    }
}

/// Describes how an update is written, based on the **PTTL** of the existing key.
#[derive(Debug, PartialEq, Eq)]
enum UpdatePlan {
    /// There is no key to update.
    Missing,
    /// The key never expires and keeps doing so.
    Persist,
    /// The key has to expire after the given number of milliseconds.
    ExpireIn(i64),
}

impl UpdatePlan {
    fn from_pttl(pttl: i64) -> Self {
        match pttl {
            NO_EXPIRY => UpdatePlan::Persist,
            // The key still exists but PX requires a positive value...
            millis if millis >= 0 => UpdatePlan::ExpireIn(millis.max(1)),
            _ => UpdatePlan::Missing,
        }
    }

    /// Returns the expiry to report for the written value or **None** if nothing is written.
    fn expire_at(&self, now: i64) -> Option<i64> {
        match self {
            UpdatePlan::Missing => None,
            UpdatePlan::Persist => Some(0),
            UpdatePlan::ExpireIn(millis) => Some(now.saturating_add(seconds_from_millis(*millis))),
        }
    }
}

/// Interprets the reply of the **EXEC** which deletes a watched key.
///
/// **EXEC** yields nil if the watched key was modified, in which case nothing was deleted.
fn watched_delete_succeeded(reply: Option<(i64,)>) -> bool {
    matches!(reply, Some((count,)) if count > 0)
}

#[async_trait]
impl KvStore for RedisStore {
    fn name(&self) -> &str {
        "redis"
    }

    async fn set(&self, record: &dyn Record, ttl_seconds: u64) -> CacheResult<()> {
        let key = composite_key(record);
        let payload = record.value().map_err(CacheError::invalid_record)?;

        self.query(move |con| {
            let mut cmd = redis::cmd("SET");
            let _ = cmd.arg(&key).arg(&payload);
            if ttl_seconds > 0 {
                let _ = cmd.arg("EX").arg(ttl_seconds);
            }
            cmd.query::<()>(con)
        })
        .await
    }

    async fn get(&self, record: &dyn Record) -> CacheResult<Option<StoredValue>> {
        let key = composite_key(record);
        let now = clock::now();

        let (payload, pttl) = self
            .query(move |con| {
                redis::pipe()
                    .cmd("GET")
                    .arg(&key)
                    .cmd("PTTL")
                    .arg(&key)
                    .query::<(Option<String>, i64)>(con)
            })
            .await?;

        Ok(payload.map(|payload| StoredValue::new(payload, expiry_from_pttl(pttl, now))))
    }

    async fn update(&self, record: &dyn Record) -> CacheResult<Option<i64>> {
        let key = composite_key(record);
        let payload = record.value().map_err(CacheError::invalid_record)?;
        let now = clock::now();

        self.query(move |con| {
            let plan = UpdatePlan::from_pttl(redis::cmd("PTTL").arg(&key).query::<i64>(con)?);
            match plan {
                UpdatePlan::Missing => {}
                UpdatePlan::Persist => {
                    redis::cmd("SET").arg(&key).arg(&payload).query::<()>(con)?;
                }
                UpdatePlan::ExpireIn(millis) => {
                    redis::cmd("SET")
                        .arg(&key)
                        .arg(&payload)
                        .arg("PX")
                        .arg(millis)
                        .query::<()>(con)?;
                }
            }

            Ok(plan.expire_at(now))
        })
        .await
    }

    async fn list_with_key_prefix(
        &self,
        prototype: &dyn ConsistentRecord,
    ) -> CacheResult<Vec<StoredRow>> {
        let table = prototype.table_name().to_owned();
        let pattern = format!("{}*", escape_glob(&composite_key(prototype)));
        let batch_size = self.config.scan_count.max(1);
        let now = clock::now();

        self.query(move |con| {
            let mut scan = redis::cmd("SCAN");
            let _ = scan
                .cursor_arg(0)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(batch_size);
            let mut keys: Vec<String> = scan.iter::<String>(con)?.collect();

            // SCAN may report a key more than once...
            keys.sort();
            keys.dedup();

            let mut rows = Vec::with_capacity(keys.len());
            for batch in keys.chunks(batch_size) {
                let mut values = redis::pipe();
                let mut pttls = redis::pipe();
                for key in batch {
                    let _ = values.cmd("GET").arg(key);
                    let _ = pttls.cmd("PTTL").arg(key);
                }
                let values = values.query::<Vec<Option<String>>>(con)?;
                let pttls = pttls.query::<Vec<i64>>(con)?;

                for ((key, value), pttl) in batch.iter().zip(values).zip(pttls) {
                    if let (Some(primary_key), Some(payload)) = (primary_key_of(&table, key), value)
                    {
                        rows.push(StoredRow {
                            primary_key: primary_key.to_owned(),
                            value: StoredValue::new(payload, expiry_from_pttl(pttl, now)),
                        });
                    }
                }
            }

            Ok(rows)
        })
        .await
    }

    async fn delete_expired(&self, _prototype: &dyn Record) -> CacheResult<()> {
        Ok(())
    }

    async fn compare_and_delete(
        &self,
        record: &dyn Record,
        matcher: &Matcher<'_>,
    ) -> CacheResult<bool> {
        let key = composite_key(record);
        let now = clock::now();

        let watched_key = key.clone();
        let (connection, (payload, pttl)) = self
            .blocking(None, move |con| {
                redis::pipe()
                    .cmd("UNWATCH")
                    .ignore()
                    .cmd("WATCH")
                    .arg(&watched_key)
                    .ignore()
                    .cmd("GET")
                    .arg(&watched_key)
                    .cmd("PTTL")
                    .arg(&watched_key)
                    .query::<(Option<String>, i64)>(con)
            })
            .await?;

        let matched = match payload {
            Some(payload) => matcher(&StoredValue::new(payload, expiry_from_pttl(pttl, now))),
            None => Err(CacheError::NotFound),
        };

        match matched {
            Ok(true) => {
                let (_, reply) = self
                    .blocking(Some(connection), move |con| {
                        redis::pipe()
                            .atomic()
                            .cmd("DEL")
                            .arg(&key)
                            .query::<Option<(i64,)>>(con)
                    })
                    .await?;

                Ok(watched_delete_succeeded(reply))
            }
            other => {
                self.unwatch(connection).await;
                other
            }
        }
    }
}
