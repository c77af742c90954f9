//! Runs the periodic garbage collection of a cache.
//!
//! Each tick first evicts all expired entries from the memory tier and then asks the persistent
//! tier to purge the expired entries of every registered table. An eviction only succeeds if the
//! entry still holds the expired value, therefore a concurrent write of a fresh value is never
//! discarded.
//!
//! Failures of the persistent tier are logged and otherwise ignored, the next tick simply tries
//! again.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use crate::clock;
use crate::fmt::format_duration;
use crate::memkv::cache::Inner;

/// Spawns the GC loop for the given cache state unless GC is disabled.
///
/// The loop stops once **shutdown** is cancelled.
pub(crate) fn install(inner: Arc<Inner>, interval: Duration, shutdown: CancellationToken) {
    if interval.is_zero() {
        log::debug!("GC is disabled for this cache.");
        return;
    }

    if tokio::runtime::Handle::try_current().is_err() {
        log::warn!("No tokio runtime is available - GC will not run for this cache.");
        return;
    }

    log::debug!("Starting GC which runs every {}...", format_duration(interval));
    crate::spawn!(async move {
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(interval) => {
                    let _ = inner.collect_garbage().await;
                }
            }
        }

        log::debug!("GC has been stopped.");
    });
}

impl Inner {
    /// Performs a single GC run and returns the number of evicted memory entries.
    pub(crate) async fn collect_garbage(&self) -> usize {
        let watch = Instant::now();
        let now = clock::now();

        let mut evicted = 0;
        self.index.range(|key, value| {
            if value.is_expired(now) && self.index.compare_and_delete(key, value) {
                evicted += 1;
            }
            true
        });
        self.stats.record_gc_evictions(evicted as u64);

        if let Some(store) = &self.store {
            let prototypes = self.prototypes.read().clone();
            for prototype in prototypes {
                if let Err(error) = store.delete_expired(prototype.as_ref()).await {
                    log::error!(
                        "Failed to purge expired entries of {} in {}: {}",
                        prototype.table_name(),
                        store.name(),
                        error
                    );
                }
            }
        }

        log::debug!(
            "GC evicted {} entries from memory in {}.",
            evicted,
            format_duration(watch.elapsed())
        );

        evicted
    }
}

#[cfg(test)]
mod tests {
    use crate::config::CacheConfig;
    use crate::kv::MemoryStore;
    use crate::memkv::testing::Item;
    use crate::memkv::Cache;
    use mock_instant::thread_local::MockClock;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    #[test]
    fn expired_entries_are_evicted_from_both_tiers() {
        crate::testing::test_async(async {
            let store = Arc::new(MemoryStore::new());
            let cache = Cache::new(
                Some(store.clone()),
                CacheConfig::new().without_gc(),
                CancellationToken::new(),
            );
            cache.register(Item::filter("T", ""));

            cache.set(&mut Item::new("T", "short", "a"), 5).await.unwrap();
            cache.set(&mut Item::new("T", "long", "b"), 3600).await.unwrap();
            cache.set(&mut Item::new("T", "forever", "c"), 0).await.unwrap();

            MockClock::advance(Duration::from_secs(10));
            assert_eq!(cache.collect_garbage().await, 1);

            assert_eq!(cache.len(), 2);
            assert_eq!(store.len(), 2);
            assert!(store.peek(&Item::filter("T", "short")).is_none());
            assert_eq!(cache.stats().gc_evictions(), 1);
        });
    }

    #[test]
    fn unregistered_tables_are_left_alone_in_the_store() {
        crate::testing::test_async(async {
            let store = Arc::new(MemoryStore::new());
            let cache = Cache::new(
                Some(store.clone()),
                CacheConfig::new().without_gc(),
                CancellationToken::new(),
            );

            cache.set(&mut Item::new("T", "short", "a"), 5).await.unwrap();
            MockClock::advance(Duration::from_secs(10));
            assert_eq!(cache.collect_garbage().await, 1);

            assert!(cache.is_empty());
            assert_eq!(
                store.peek(&Item::filter("T", "short")).map(|value| value.payload),
                Some("a".to_owned())
            );
        });
    }

    #[test]
    fn store_failures_do_not_abort_gc() {
        crate::testing::test_async(async {
            let store = Arc::new(MemoryStore::new());
            let cache = Cache::new(
                Some(store.clone()),
                CacheConfig::new().without_gc(),
                CancellationToken::new(),
            );
            cache.register(Item::filter("T", ""));
            cache.register(Item::filter("U", ""));

            cache.set(&mut Item::new("T", "K", "a"), 5).await.unwrap();
            store.set_available(false);
            MockClock::advance(Duration::from_secs(10));

            assert_eq!(cache.collect_garbage().await, 1);
            assert_eq!(
                store.calls()[1..],
                ["delete_expired T".to_owned(), "delete_expired U".to_owned()]
            );
        });
    }

    #[test]
    fn fresh_values_survive_gc() {
        crate::testing::test_async(async {
            let cache = Cache::new(
                None,
                CacheConfig::new().without_gc(),
                CancellationToken::new(),
            );

            cache.set(&mut Item::new("T", "K", "old"), 5).await.unwrap();
            MockClock::advance(Duration::from_secs(10));
            cache.set(&mut Item::new("T", "K", "new"), 3600).await.unwrap();

            assert_eq!(cache.collect_garbage().await, 0);
            assert_eq!(cache.get(Item::filter("T", "K")).await.unwrap().value, "new");
        });
    }

    #[test]
    fn the_loop_runs_periodically_and_stops_on_cancellation() {
        crate::testing::test_async(async {
            let lifecycle = CancellationToken::new();
            let store = Arc::new(MemoryStore::new());
            let cache = Cache::new(
                Some(store.clone()),
                CacheConfig::new().with_gc_interval(Duration::from_millis(20)),
                lifecycle.clone(),
            );
            cache.register(Item::filter("T", ""));

            cache.set(&mut Item::new("T", "K", "a"), 5).await.unwrap();
            MockClock::advance(Duration::from_secs(10));
            tokio::time::sleep(Duration::from_millis(100)).await;

            assert!(cache.is_empty());
            assert!(store.is_empty());

            lifecycle.cancel();
            tokio::time::sleep(Duration::from_millis(50)).await;
            store.reset_calls();
            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(store.call_count(), 0);
        });
    }

    #[test]
    fn dropping_the_cache_stops_the_loop() {
        crate::testing::test_async(async {
            let store = Arc::new(MemoryStore::new());
            let cache = Cache::new(
                Some(store.clone()),
                CacheConfig::new().with_gc_interval(Duration::from_millis(20)),
                CancellationToken::new(),
            );
            cache.register(Item::filter("T", ""));
            drop(cache);

            tokio::time::sleep(Duration::from_millis(100)).await;
            assert_eq!(store.call_count(), 0);
        });
    }

    #[test]
    fn caches_can_be_created_outside_of_a_runtime() {
        let cache = Cache::new(None, CacheConfig::default(), CancellationToken::new());
        let _ = cache.remove(&Item::filter("T", "K"));
        assert!(cache.is_empty());

        // Values are still usable once a runtime is around...
        crate::testing::test_async(async move {
            cache.set(&mut Item::new("T", "K", "a"), 0).await.unwrap();
            assert_eq!(
                cache.get(Item::filter("T", "K")).await.unwrap().value,
                "a"
            );
        });
    }
}
