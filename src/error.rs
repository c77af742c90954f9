//! Contains the error kinds reported by the cache and its persistent tiers.
//!
//! Callers typically only need to distinguish [CacheError::NotFound] and [CacheError::Expired]
//! from "real" failures. Both can be checked via [CacheError::is_not_found] and
//! [CacheError::is_expired] without matching on the enum.
//!
//! Note that internally, record serialization as well as the store adapters use **anyhow**. These
//! errors are wrapped into [CacheError::InvalidRecord] or [CacheError::StoreFailure] once they
//! cross the boundary into the cache.
use thiserror::Error;

/// Enumerates all errors which are reported by the cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// No entry exists for the composite key.
    #[error("no entry exists for the given key")]
    NotFound,

    /// An entry exists, but its expiry lies in the past and GC hasn't reclaimed it yet.
    #[error("the entry for the given key has expired")]
    Expired,

    /// The record refused to serialize itself or to unmarshal a stored payload.
    #[error("invalid record: {0:#}")]
    InvalidRecord(#[source] anyhow::Error),

    /// The persistent tier failed (network error, unavailable server, ...).
    #[error("store failure: {0:#}")]
    StoreFailure(#[source] anyhow::Error),

    /// A configuration value could not be parsed.
    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl CacheError {
    /// Wraps the given error as a failure of the persistent tier.
    pub fn store(error: impl Into<anyhow::Error>) -> Self {
        CacheError::StoreFailure(error.into())
    }

    /// Wraps the given error as a serialization problem of a record.
    pub fn invalid_record(error: impl Into<anyhow::Error>) -> Self {
        CacheError::InvalidRecord(error.into())
    }

    /// Determines if this error signals a missing entry.
    pub fn is_not_found(&self) -> bool {
        matches!(self, CacheError::NotFound)
    }

    /// Determines if this error signals an expired entry.
    pub fn is_expired(&self) -> bool {
        matches!(self, CacheError::Expired)
    }
}

/// Shortcut for results produced by the cache.
pub type CacheResult<T> = Result<T, CacheError>;

#[cfg(test)]
mod tests {
    use crate::error::CacheError;

    #[test]
    fn kinds_are_detected() {
        assert!(CacheError::NotFound.is_not_found());
        assert!(!CacheError::NotFound.is_expired());
        assert!(CacheError::Expired.is_expired());
        assert!(!CacheError::store(anyhow::anyhow!("connection refused")).is_not_found());
    }

    #[test]
    fn messages_contain_the_cause() {
        let error = CacheError::store(anyhow::anyhow!("connection refused"));
        assert_eq!(error.to_string(), "store failure: connection refused");

        let error = CacheError::invalid_record(anyhow::anyhow!("unexpected EOF"));
        assert_eq!(error.to_string(), "invalid record: unexpected EOF");
    }
}
