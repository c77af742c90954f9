//! Provides a write-through cache which keeps records in memory and mirrors them into a
//! persistent tier.
//!
//! The central type is the [Cache]. It stores [Record]s in a [MemIndex] (keyed by their
//! composite key `<table>_<primary key>`) and forwards every write to an optional
//! [KvStore](crate::kv::KvStore) like Redis or PostgreSQL. Reads are served from memory and fall
//! through to the persistent tier on a miss.
//!
//! Every entry carries an absolute expiry. A background task periodically evicts expired entries
//! from memory and purges them from the persistent tier (for all tables which have been
//! [registered](Cache::register)).
pub mod cache;
mod gc;
pub mod index;
pub mod record;

#[cfg(test)]
pub(crate) mod testing;

pub use cache::{Cache, CacheStats};
pub use index::MemIndex;
pub use record::{composite_key, primary_key_of, ConsistentRecord, Record, KEY_SEPARATOR};
