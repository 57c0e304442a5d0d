//! Cache Store Module
//!
//! The cache engine: a keyed store of shared, multicast computations.
//!
//! Each distinct canonical key maps to at most one live entry, so any number
//! of callers requesting the same key collapse into a single producer
//! invocation (single-flight). Entries live until explicitly invalidated;
//! a failed producer stream stays cached, errors and all, until the caller
//! clears it.

use std::collections::HashMap;

use serde::Serialize;
use tracing::debug;

use crate::cache::entry::CacheEntry;
use crate::cache::shared::{SharedStream, ValueStream};
use crate::cache::{Cache, CacheStats};
use crate::error::Result;
use crate::key;

// == Collaborator Types ==
/// The caller-supplied producer: key to raw value stream.
pub type Producer<K, V> = Box<dyn Fn(&K) -> ValueStream<V> + Send + Sync>;

/// Key normalization function: key to canonical string identifier.
pub type KeyNormalizer<K> = Box<dyn Fn(&K) -> Result<String> + Send + Sync>;

// == Reactive Cache ==
/// Memoizing cache for values produced by asynchronous producers.
///
/// Store mutation is synchronous (`&mut self`); only the values flowing
/// through the returned [`SharedStream`]s arrive asynchronously. Embedders
/// that share the cache across tasks wrap it in `Arc<RwLock<..>>`, which
/// also keeps the check-then-create step in [`get`](ReactiveCache::get)
/// atomic.
pub struct ReactiveCache<K, V> {
    /// Canonical identifier -> cached entry
    entries: HashMap<String, CacheEntry<K, V>>,
    /// Invoked once per canonical key until the entry is deleted
    producer: Producer<K, V>,
    /// Maps keys to canonical identifiers
    normalizer: KeyNormalizer<K>,
    /// Performance statistics
    stats: CacheStats,
}

impl<K, V> ReactiveCache<K, V>
where
    K: Clone,
    V: Clone + Send + 'static,
{
    // == Constructor With Custom Normalizer ==
    /// Creates a cache with a caller-supplied key normalizer.
    ///
    /// Use this when the default structural normalization does not fit,
    /// e.g. to get deep normalization of nested keys.
    pub fn with_normalizer(
        producer: impl Fn(&K) -> ValueStream<V> + Send + Sync + 'static,
        normalizer: impl Fn(&K) -> Result<String> + Send + Sync + 'static,
    ) -> Self {
        Self {
            entries: HashMap::new(),
            producer: Box::new(producer),
            normalizer: Box::new(normalizer),
            stats: CacheStats::new(),
        }
    }

    // == Size ==
    /// Returns the number of live entries. No side effects.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    // == Keys ==
    /// Returns the original (non-normalized) keys of all live entries.
    ///
    /// Iteration order is stable within a process run but is not a contract.
    pub fn keys(&self) -> Vec<K> {
        self.entries
            .values()
            .map(|entry| entry.original_key.clone())
            .collect()
    }

    // == Get ==
    /// Returns the shared stream for `key`, invoking the producer on a miss.
    ///
    /// This is the memoization point: calls with keys that normalize
    /// identically always resolve to the same producer invocation and the
    /// same shared stream. On a miss, the producer starts executing
    /// immediately; the engine's keep-alive pins the computation until the
    /// entry is deleted.
    ///
    /// # Errors
    /// Propagates invalid-key failures from the normalizer; the store is
    /// left unchanged and the producer is not invoked.
    pub fn get(&mut self, key: &K) -> Result<SharedStream<V>> {
        let string_key = (self.normalizer)(key)?;

        if let Some(entry) = self.entries.get(&string_key) {
            self.stats.record_hit();
            return Ok(entry.shared());
        }

        self.stats.record_miss();
        let source = (self.producer)(key);
        let entry = CacheEntry::new(key.clone(), source);
        let shared = entry.shared();
        self.entries.insert(string_key.clone(), entry);
        self.stats.set_total_entries(self.entries.len());
        debug!("Cached new producer stream for key '{}'", string_key);

        Ok(shared)
    }

    // == Set ==
    /// Installs a caller-supplied value stream for `key`.
    ///
    /// Any existing entry is destroyed first, exactly as `delete` would.
    /// Observers of the previous entry's stream keep what they already
    /// received; the store simply no longer associates that stream with the
    /// key.
    ///
    /// # Errors
    /// Propagates invalid-key failures from the normalizer.
    pub fn set(&mut self, key: &K, source: ValueStream<V>) -> Result<()> {
        let string_key = (self.normalizer)(key)?;

        if self.remove_entry(&string_key) {
            debug!("Replaced cached stream for key '{}'", string_key);
        }

        let entry = CacheEntry::new(key.clone(), source);
        self.entries.insert(string_key, entry);
        self.stats.set_total_entries(self.entries.len());

        Ok(())
    }

    // == Delete ==
    /// Destroys the entry for `key`, releasing its keep-alive.
    ///
    /// A missing entry is a no-op, not an error.
    ///
    /// # Errors
    /// Propagates invalid-key failures from the normalizer.
    pub fn delete(&mut self, key: &K) -> Result<()> {
        let string_key = (self.normalizer)(key)?;

        if self.remove_entry(&string_key) {
            debug!("Invalidated cache entry for key '{}'", string_key);
        }
        self.stats.set_total_entries(self.entries.len());

        Ok(())
    }

    // == Delete All ==
    /// Destroys every live entry.
    pub fn delete_all(&mut self) {
        let removed = self.entries.len();
        for (_, entry) in self.entries.drain() {
            // Dropping the entry releases its keep-alive.
            drop(entry);
            self.stats.record_invalidation();
        }
        self.stats.set_total_entries(0);
        if removed > 0 {
            debug!("Invalidated all {} cache entries", removed);
        }
    }

    // == Stats ==
    /// Returns current cache statistics.
    pub fn stats(&self) -> CacheStats {
        let mut stats = self.stats.clone();
        stats.set_total_entries(self.entries.len());
        stats
    }

    // == Remove Entry ==
    /// Removes and releases one entry; returns whether it existed.
    fn remove_entry(&mut self, string_key: &str) -> bool {
        match self.entries.remove(string_key) {
            Some(entry) => {
                // Keep-alive release happens before the caller proceeds.
                drop(entry);
                self.stats.record_invalidation();
                true
            }
            None => false,
        }
    }
}

impl<K, V> ReactiveCache<K, V>
where
    K: Clone + Serialize + 'static,
    V: Clone + Send + 'static,
{
    // == Constructor ==
    /// Creates a cache using the default structural key normalizer.
    pub fn new(producer: impl Fn(&K) -> ValueStream<V> + Send + Sync + 'static) -> Self {
        Self::with_normalizer(producer, key::normalize::<K>)
    }
}

// == Cache Contract ==
impl<K, V> Cache<K, V> for ReactiveCache<K, V>
where
    K: Clone,
    V: Clone + Send + 'static,
{
    fn size(&self) -> usize {
        ReactiveCache::size(self)
    }

    fn keys(&self) -> Vec<K> {
        ReactiveCache::keys(self)
    }

    fn get(&mut self, key: &K) -> Result<SharedStream<V>> {
        ReactiveCache::get(self, key)
    }

    fn set(&mut self, key: &K, source: ValueStream<V>) -> Result<()> {
        ReactiveCache::set(self, key, source)
    }

    fn delete(&mut self, key: &K) -> Result<()> {
        ReactiveCache::delete(self, key)
    }

    fn delete_all(&mut self) {
        ReactiveCache::delete_all(self)
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use futures::stream;
    use futures::StreamExt;
    use serde_json::json;

    use crate::error::{CacheError, ProducerError};

    /// Producer that counts invocations and emits a single value.
    fn counting_producer(
        counter: Arc<AtomicUsize>,
    ) -> impl Fn(&String) -> ValueStream<i32> + Send + Sync {
        move |_key| {
            counter.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Ok(1)]).boxed()
        }
    }

    #[tokio::test]
    async fn test_get_invokes_producer_once_per_key() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter.clone()));

        let key = "a".to_string();
        cache.get(&key).unwrap();
        cache.get(&key).unwrap();
        cache.get(&key).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_get_distinct_keys_invoke_producer_separately() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter.clone()));

        cache.get(&"a".to_string()).unwrap();
        cache.get(&"b".to_string()).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
        assert_eq!(cache.size(), 2);
    }

    #[tokio::test]
    async fn test_structurally_equal_keys_share_one_entry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let mut cache = ReactiveCache::new(move |_key: &serde_json::Value| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Ok(1)]).boxed()
        });

        cache.get(&json!({"a": 1, "b": 2})).unwrap();
        cache.get(&json!({"b": 2, "a": 1})).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_invalid_key_leaves_store_unchanged() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let mut cache = ReactiveCache::new(move |_key: &serde_json::Value| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Ok(1)]).boxed()
        });

        let result = cache.get(&serde_json::Value::Null);
        assert!(matches!(result, Err(CacheError::NullKey)));

        let result = cache.get(&json!({}));
        assert!(matches!(result, Err(CacheError::EmptyKey { .. })));

        // Neither the store nor the producer was touched.
        assert_eq!(cache.size(), 0);
        assert_eq!(counter.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_keys_returns_original_keys() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter));

        cache.get(&"first".to_string()).unwrap();
        cache.get(&"second".to_string()).unwrap();

        let mut keys = cache.keys();
        keys.sort();
        assert_eq!(keys, vec!["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn test_set_replaces_existing_entry() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter.clone()));

        let key = "a".to_string();
        cache.get(&key).unwrap();
        cache
            .set(&key, stream::iter(vec![Ok(99)]).boxed())
            .unwrap();

        // The installed stream answers subsequent gets; no new producer call.
        let shared = cache.get(&key).unwrap();
        let seen: Vec<_> = shared.subscribe().collect().await;
        assert_eq!(seen, vec![Ok(99)]);
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_delete_then_get_reinvokes_producer() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter.clone()));

        let key = "a".to_string();
        cache.get(&key).unwrap();
        cache.delete(&key).unwrap();
        cache.get(&key).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_delete_missing_key_is_noop() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter));

        assert!(cache.delete(&"ghost".to_string()).is_ok());
        assert_eq!(cache.size(), 0);
    }

    #[tokio::test]
    async fn test_delete_all_empties_store() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter));

        cache.get(&"a".to_string()).unwrap();
        cache.get(&"b".to_string()).unwrap();
        cache.delete_all();

        assert_eq!(cache.size(), 0);
        assert!(cache.keys().is_empty());
    }

    #[tokio::test]
    async fn test_failed_entry_stays_cached() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let mut cache = ReactiveCache::new(move |_key: &String| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            stream::iter(vec![Err::<i32, _>(ProducerError::new("down"))]).boxed()
        });

        let key = "a".to_string();
        let shared = cache.get(&key).unwrap();
        let seen: Vec<_> = shared.subscribe().collect().await;
        assert_eq!(seen, vec![Err(ProducerError::new("down"))]);

        // No auto-retry, no auto-evict: the failed entry is still there.
        cache.get(&key).unwrap();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_custom_normalizer_overrides_default() {
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();
        let mut cache = ReactiveCache::with_normalizer(
            move |_key: &String| {
                counter_clone.fetch_add(1, Ordering::SeqCst);
                stream::iter(vec![Ok(1)]).boxed()
            },
            // Case-insensitive keys.
            |key: &String| Ok(key.to_lowercase()),
        );

        cache.get(&"Token".to_string()).unwrap();
        cache.get(&"TOKEN".to_string()).unwrap();

        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(cache.size(), 1);
    }

    #[tokio::test]
    async fn test_stats_track_hits_misses_invalidations() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut cache = ReactiveCache::new(counting_producer(counter));

        let key = "a".to_string();
        cache.get(&key).unwrap(); // miss
        cache.get(&key).unwrap(); // hit
        cache.delete(&key).unwrap(); // invalidation

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.total_entries, 0);
        assert_eq!(stats.hit_rate(), 0.5);
    }
}
