//! Contains the configuration of a cache.
//!
//! The cache itself only has a single knob: the tick period of its garbage collector. A config
//! can either be built in code or be read from a YAML document (or file) which contains a
//! **memkv** section:
//!
//! ```yaml
//! memkv:
//!     # Specifies how often expired entries are purged. Supports common suffixes like
//!     # s, m, h, d. A plain (integer) number is treated as seconds, where zero or a negative
//!     # value disables the garbage collector.
//!     gc_interval: 10m
//! ```
//!
//! # Examples
//!
//! ```
//! # use pkgx::config::CacheConfig;
//! # use std::time::Duration;
//! let config = CacheConfig::from_yaml("
//! memkv:
//!     gc_interval: 30s
//! ").unwrap();
//! assert_eq!(config.gc_interval, Duration::from_secs(30));
//!
//! // A missing section yields the defaults...
//! assert_eq!(CacheConfig::from_yaml("server: 42").unwrap(), CacheConfig::default());
//! ```
use std::time::Duration;

use yaml_rust::{Yaml, YamlLoader};

use crate::error::{CacheError, CacheResult};
use crate::fmt::parse_duration;

/// The GC tick period used if nothing else is configured.
pub const DEFAULT_GC_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// Configures a [Cache](crate::memkv::Cache).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// Specifies how often the garbage collector runs. A zero duration disables it.
    pub gc_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            gc_interval: DEFAULT_GC_INTERVAL,
        }
    }
}

impl CacheConfig {
    /// Creates a config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the GC tick period.
    pub fn with_gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = interval;
        self
    }

    /// Sets the GC tick period in seconds. Zero or a negative value disables GC.
    pub fn with_gc_interval_secs(mut self, seconds: i64) -> Self {
        self.gc_interval = Duration::from_secs(seconds.max(0) as u64);
        self
    }

    /// Disables the garbage collector.
    pub fn without_gc(self) -> Self {
        self.with_gc_interval(Duration::ZERO)
    }

    /// Determines if the garbage collector should run at all.
    pub fn gc_enabled(&self) -> bool {
        !self.gc_interval.is_zero()
    }

    /// Reads the config from the **memkv** section of the given YAML document.
    ///
    /// Missing values are filled with their defaults.
    pub fn from_yaml(data: &str) -> CacheResult<Self> {
        let docs = YamlLoader::load_from_str(data)
            .map_err(|error| CacheError::InvalidConfig(format!("Cannot parse YAML: {}", error)))?;

        let mut config = CacheConfig::default();
        if let Some(doc) = docs.first() {
            match &doc["memkv"]["gc_interval"] {
                Yaml::Integer(seconds) => config = config.with_gc_interval_secs(*seconds),
                Yaml::String(value) => {
                    config.gc_interval = parse_duration(value)
                        .map_err(|error| CacheError::InvalidConfig(error.to_string()))?
                }
                Yaml::BadValue | Yaml::Null => (),
                other => {
                    return Err(CacheError::InvalidConfig(format!(
                        "memkv.gc_interval has an unexpected value: {:?}",
                        other
                    )))
                }
            }
        }

        Ok(config)
    }

    /// Reads the config from the given YAML file.
    ///
    /// If the file doesn't exist, the defaults are used.
    pub async fn load(file: &str) -> CacheResult<Self> {
        log::info!("Loading config file {}...", file);

        match tokio::fs::metadata(file).await {
            Ok(metadata) if metadata.is_file() => (),
            _ => {
                log::info!("Config file {} doesn't exist - using defaults.", file);
                return Ok(CacheConfig::default());
            }
        }

        let data = tokio::fs::read_to_string(file).await.map_err(|error| {
            CacheError::InvalidConfig(format!("Cannot load config file {}: {}", file, error))
        })?;

        CacheConfig::from_yaml(&data)
    }
}
