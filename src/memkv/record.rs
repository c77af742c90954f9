//! Defines the entity contract which has to be implemented by everything stored in a cache.
//!
//! A record knows its table name and primary key (which together form the composite key), can
//! serialize itself into an opaque payload and replace its value from such a payload. The cache
//! never inspects a payload, it only shuttles it between memory and the persistent tier.
//!
//! # Example
//!
//! ```
//! # use pkgx::memkv::{Record, ConsistentRecord, composite_key};
//! #[derive(Clone, Default)]
//! struct Session {
//!     id: String,
//!     user: String,
//!     expire_at: i64,
//! }
//!
//! impl Record for Session {
//!     fn table_name(&self) -> &str {
//!         "sessions"
//!     }
//!
//!     fn primary_key(&self) -> String {
//!         self.id.clone()
//!     }
//!
//!     fn value(&self) -> anyhow::Result<String> {
//!         Ok(self.user.clone())
//!     }
//!
//!     fn unmarshal(&mut self, payload: &str) -> anyhow::Result<()> {
//!         self.user = payload.to_owned();
//!         Ok(())
//!     }
//!
//!     fn expire_at(&self) -> i64 {
//!         self.expire_at
//!     }
//!
//!     fn set_expire_at(&mut self, expire_at: i64) {
//!         self.expire_at = expire_at;
//!     }
//! }
//!
//! impl ConsistentRecord for Session {
//!     fn key_column(&self) -> &str {
//!         "id"
//!     }
//! }
//!
//! let session = Session { id: "42".to_owned(), ..Default::default() };
//! assert_eq!(composite_key(&session), "sessions_42");
//! ```

/// The separator placed between table name and primary key.
pub const KEY_SEPARATOR: char = '_';

/// Describes an entity which can be stored in a [Cache](crate::memkv::Cache).
///
/// Note that the trait is object safe, so that persistent tiers can operate on `&dyn Record`.
/// The cache operations which need to create fresh instances additionally require `Clone`.
pub trait Record: Send + Sync + 'static {
    /// Returns the logical namespace of the record.
    fn table_name(&self) -> &str;

    /// Returns the primary key, which has to be unique within the table.
    fn primary_key(&self) -> String;

    /// Serializes the value of this record into an opaque payload.
    fn value(&self) -> anyhow::Result<String>;

    /// Replaces the value of this record with the given payload.
    fn unmarshal(&mut self, payload: &str) -> anyhow::Result<()>;

    /// Returns the absolute expiry in Unix seconds (0 = never expires).
    fn expire_at(&self) -> i64;

    /// Updates the absolute expiry in Unix seconds.
    fn set_expire_at(&mut self, expire_at: i64);
}

/// Refines a [Record] for prefix scans on the persistent tier.
pub trait ConsistentRecord: Record {
    /// Returns the name of the column which holds the primary key on the persistent tier.
    fn key_column(&self) -> &str;
}

/// Computes the composite key of the given record: `<table_name>_<primary_key>`.
pub fn composite_key(record: &dyn Record) -> String {
    let table = record.table_name();
    let primary_key = record.primary_key();

    let mut key = String::with_capacity(table.len() + 1 + primary_key.len());
    key.push_str(table);
    key.push(KEY_SEPARATOR);
    key.push_str(&primary_key);

    key
}

/// Extracts the primary key from a composite key of the given table.
pub fn primary_key_of<'a>(table: &str, key: &'a str) -> Option<&'a str> {
    key.strip_prefix(table)
        .and_then(|rest| rest.strip_prefix(KEY_SEPARATOR))
}
