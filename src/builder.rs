//! Provides a builder which can be used to set up and initialize a cache.
//!
//! A cache has a few optional parts (logging, a persistent tier, GC registrations), which can be
//! selectively enabled here.
//!
//! # Example
//! Setting up a cache which writes through to Redis:
//! ```no_run
//! # use pkgx::builder::Builder;
//! # use pkgx::kv::{RedisConfig, RedisStore};
//! # use std::sync::Arc;
//! #[tokio::main]
//! async fn main() {
//!     let store = RedisStore::new(RedisConfig::default()).unwrap();
//!
//!     let cache = Builder::new()
//!         .enable_logging()
//!         .with_store(Arc::new(store))
//!         .load_config("settings.yml")
//!         .build()
//!         .await
//!         .unwrap();
//!
//!     // Use the cache here...
//! #   drop(cache);
//! }
//! ```
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::config::CacheConfig;
use crate::error::CacheResult;
use crate::init_logging;
use crate::kv::KvStore;
use crate::memkv::{Cache, Record};
use crate::PKGX_VERSION;

/// Initializes a [Cache] along with all of its optional parts.
///
/// # Example
/// Setting up a memory-only cache:
/// ```
/// # use pkgx::builder::Builder;
/// # use std::time::Duration;
/// #[tokio::main]
/// async fn main() {
///     let cache = Builder::new()
///         .gc_interval(Duration::from_secs(60))
///         .build()
///         .await
///         .unwrap();
///
///     assert!(!cache.has_store());
/// }
/// ```
#[derive(Default)]
pub struct Builder {
    setup_logging: bool,
    store: Option<Arc<dyn KvStore>>,
    config: CacheConfig,
    config_file: Option<String>,
    gc_interval: Option<Duration>,
    prototypes: Vec<Box<dyn FnOnce(&Cache) + Send>>,
    lifecycle: Option<CancellationToken>,
}

impl Builder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Builder::default()
    }

    /// Enables the automatic setup of the logging system.
    ///
    /// Using this, we properly initialize **simplelog** to log to stdout. The date format being
    /// used is digestible by established tools like **greylog**.
    pub fn enable_logging(mut self) -> Self {
        self.setup_logging = true;
        self
    }

    /// Disables the automatic setup of the logging system.
    pub fn disable_logging(mut self) -> Self {
        self.setup_logging = false;
        self
    }

    /// Specifies the persistent tier to write through to.
    ///
    /// If no store is given, the cache operates in memory only.
    pub fn with_store(mut self, store: Arc<dyn KvStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Specifies the config to use.
    pub fn with_config(mut self, config: CacheConfig) -> Self {
        self.config = config;
        self
    }

    /// Loads the config from the given YAML file during [build](Builder::build).
    ///
    /// A missing file yields the default config. For more details see: [config](crate::config)
    pub fn load_config(mut self, file: impl Into<String>) -> Self {
        self.config_file = Some(file.into());
        self
    }

    /// Overwrites the GC tick period of the config. Use **Duration::ZERO** to disable GC.
    pub fn gc_interval(mut self, interval: Duration) -> Self {
        self.gc_interval = Some(interval);
        self
    }

    /// Registers a prototype whose table is purged on the persistent tier during GC.
    ///
    /// See [Cache::register].
    pub fn register<R: Record>(mut self, prototype: R) -> Self {
        self.prototypes
            .push(Box::new(move |cache: &Cache| cache.register(prototype)));
        self
    }

    /// Ties the GC of the cache to the given token. Once the token is cancelled, GC stops.
    ///
    /// If no token is given, GC runs until the cache is dropped.
    pub fn lifecycle(mut self, token: CancellationToken) -> Self {
        self.lifecycle = Some(token);
        self
    }

    /// Builds the [Cache] with all the enabled parts.
    ///
    /// Fails if a config file was given which cannot be parsed.
    pub async fn build(self) -> CacheResult<Cache> {
        if self.setup_logging {
            init_logging();
        }

        let mut config = match &self.config_file {
            Some(file) => CacheConfig::load(file).await?,
            None => self.config,
        };
        if let Some(interval) = self.gc_interval {
            config.gc_interval = interval;
        }

        log::info!(
            "||. PKGX MEMKV (v {}) using {} as persistent tier, GC: {}",
            PKGX_VERSION,
            self.store
                .as_ref()
                .map(|store| store.name().to_owned())
                .unwrap_or_else(|| "nothing".to_owned()),
            if config.gc_enabled() {
                crate::fmt::format_duration(config.gc_interval)
            } else {
                "disabled".to_owned()
            }
        );

        let cache = Cache::new(
            self.store,
            config,
            self.lifecycle.unwrap_or_default(),
        );
        for register in self.prototypes {
            register(&cache);
        }

        Ok(cache)
    }
}

#[cfg(test)]
mod tests {
    use crate::builder::Builder;
    use crate::kv::MemoryStore;
    use crate::memkv::testing::Item;
    use mock_instant::thread_local::MockClock;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn the_builder_wires_store_and_prototypes() {
        crate::testing::test_async(async {
            let store = Arc::new(MemoryStore::new());
            let cache = Builder::new()
                .enable_logging()
                .with_store(store.clone())
                .gc_interval(Duration::ZERO)
                .register(Item::filter("T", ""))
                .register(Item::filter("U", ""))
                .build()
                .await
                .unwrap();

            assert!(cache.has_store());
            assert_eq!(cache.registered_tables(), vec!["T", "U"]);

            cache.set(&mut Item::new("T", "K", "a"), 5).await.unwrap();
            assert_eq!(store.len(), 1);

            MockClock::advance(Duration::from_secs(10));
            let _ = cache.collect_garbage().await;
            assert!(store.is_empty());
        });
    }

    #[test]
    fn missing_config_files_yield_defaults() {
        crate::testing::test_async(async {
            let cache = Builder::new()
                .load_config("this/file/does/not/exist.yml")
                .build()
                .await
                .unwrap();
            assert!(!cache.has_store());
        });
    }

    #[test]
    fn gc_stops_with_the_lifecycle() {
        crate::testing::test_async(async {
            let store = Arc::new(MemoryStore::new());
            let lifecycle = CancellationToken::new();
            let cache = Builder::new()
                .with_store(store.clone())
                .gc_interval(Duration::from_millis(20))
                .register(Item::filter("T", ""))
                .lifecycle(lifecycle.clone())
                .build()
                .await
                .unwrap();

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert!(store.call_count() > 0);

            lifecycle.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.reset_calls();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(store.call_count(), 0);

            drop(cache);
        });
    }
}
