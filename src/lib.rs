//! A write-through key/value cache with TTL semantics.
//!
//! # Introduction
//! **pkgx** keeps frequently used records in process memory while mirroring every write into a
//! persistent tier like **Redis** or **PostgreSQL**. Reads are served from memory and only fall
//! through to the persistent tier on a miss. This way, a service can treat a remote store as its
//! source of truth while still answering most lookups without any network round trip.
//!
//! # Features
//! * **Write-through**: every mutation is applied to memory first and then forwarded to the
//!   persistent tier. See [Cache](memkv::Cache).
//! * **Consistent TTL semantics**: each record carries an absolute expiry which is honored by both
//!   tiers. Expired records are never handed out.
//! * **Garbage collection**: a background task periodically evicts expired entries from memory
//!   and purges them from the persistent tier.
//! * **Compare and delete**: deletes a record only if it still holds an expected value. On the
//!   persistent tier this is guarded by optimistic (Redis) or pessimistic (PostgreSQL) locking.
//! * **Pluggable persistent tiers**: everything implementing [KvStore](kv::KvStore) can be used.
//!   Redis and PostgreSQL are provided (feature **redis-backend** and **postgres-backend**).
//!
//! # Modules
//! * [memkv]: the cache itself along with the [Record](memkv::Record) contract.
//! * [kv]: the persistent tiers.
//! * [config]: the cache configuration, which can also be loaded from YAML.
//! * [builder]: a fluent way of setting everything up.
//!
//! # Examples
//! A short example on how to set up a cache can be found here: [Builder](builder::Builder).
#![warn(
    missing_docs,
    trivial_casts,
    trivial_numeric_casts,
    unused_extern_crates,
    unused_import_braces,
    unused_results
)]
use simplelog::{format_description, ConfigBuilder, LevelFilter, SimpleLogger};
use std::sync::Once;

pub mod builder;
pub mod clock;
pub mod config;
pub mod error;
pub mod fmt;
pub mod kv;
pub mod memkv;

/// Contains the version of the library.
pub const PKGX_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initializes the logging system.
///
/// Note that most probably the simplest way is to use a [Builder](builder::Builder) to set up the
/// cache, which will also set up logging if enabled.
pub fn init_logging() {
    static INIT_LOGGING: Once = Once::new();

    // Tests and embedding applications might call this more than once...
    INIT_LOGGING.call_once(|| {
        if let Err(error) = SimpleLogger::init(
            LevelFilter::Debug,
            ConfigBuilder::new()
                .set_time_format_custom(format_description!(
                    "[year]-[month]-[day]T[hour]:[minute]:[second].[subsecond digits:3]"
                ))
                .set_thread_level(LevelFilter::Trace)
                .set_target_level(LevelFilter::Error)
                .set_location_level(LevelFilter::Trace)
                .build(),
        ) {
            eprintln!("Failed to initialize logging system: {}", error);
        }
    });
}

/// Provides a simple macro to execute an async lambda within `tokio::spawn`.
///
/// Note that this also applies std::mem::drop on the returned handle, as the task is meant to
/// run detached.
///
/// # Example
/// ```rust
/// # #[macro_use] extern crate pkgx;
/// # #[tokio::main]
/// # async fn main() {
/// spawn!(async move {
///     // perform some async stuff here...
/// });
/// # }
/// ```
#[macro_export]
macro_rules! spawn {
    ($e:expr) => {{
        std::mem::drop(tokio::spawn($e));
    }};
}
