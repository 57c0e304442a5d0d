//! Reactive Cache - an in-memory memoizing cache for asynchronous value streams
//!
//! Given a key, the cache returns a shared, multicast stream backed by a
//! producer that runs at most once per distinct key. Every observer sees the
//! same values in the same order, late observers immediately receive the
//! most recent value, and entries can be explicitly invalidated and
//! re-triggered.
//!
//! # Example
//!
//! ```
//! use futures::{stream, StreamExt};
//! use reactive_cache::ReactiveCache;
//!
//! # tokio_test::block_on(async {
//! let mut cache = ReactiveCache::new(|name: &String| {
//!     stream::iter(vec![Ok(format!("hello {name}"))]).boxed()
//! });
//!
//! let shared = cache.get(&"world".to_string()).unwrap();
//! let mut observer = shared.subscribe();
//! assert_eq!(observer.next().await, Some(Ok("hello world".to_string())));
//! # });
//! ```

pub mod cache;
pub mod error;
pub mod key;

pub use cache::{Cache, CacheEntry, CacheStats, ReactiveCache, SharedStream, Subscription, ValueStream};
pub use error::{CacheError, ProducerError, Result};
