//! Provides a plain record type used throughout the tests.
use crate::memkv::{ConsistentRecord, Record};

/// A record whose payload is its value verbatim.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Item {
    pub table: String,
    pub key: String,
    pub value: String,
    pub expire_at: i64,
}

impl Item {
    pub fn new(table: &str, key: &str, value: &str) -> Self {
        Item {
            table: table.to_owned(),
            key: key.to_owned(),
            value: value.to_owned(),
            expire_at: 0,
        }
    }

    /// Creates a filter which only carries the identity of a record.
    pub fn filter(table: &str, key: &str) -> Self {
        Item::new(table, key, "")
    }
}

impl Record for Item {
    fn table_name(&self) -> &str {
        &self.table
    }

    fn primary_key(&self) -> String {
        self.key.clone()
    }

    fn value(&self) -> anyhow::Result<String> {
        Ok(self.value.clone())
    }

    fn unmarshal(&mut self, payload: &str) -> anyhow::Result<()> {
        if payload.starts_with('!') {
            anyhow::bail!("payload '{}' is corrupt", payload);
        }
        self.value = payload.to_owned();
        Ok(())
    }

    fn expire_at(&self) -> i64 {
        self.expire_at
    }

    fn set_expire_at(&mut self, expire_at: i64) {
        self.expire_at = expire_at;
    }
}

impl ConsistentRecord for Item {
    fn key_column(&self) -> &str {
        "id"
    }
}

/// Compares two items by their value.
pub fn same_value(left: &Item, right: &Item) -> bool {
    left.value == right.value
}
