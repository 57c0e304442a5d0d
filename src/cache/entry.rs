//! Cache Entry Module
//!
//! Defines the unit of cached state: one shared stream per canonical key,
//! pinned by the engine's keep-alive guard.

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;

use crate::cache::shared::{SharedStream, ValueStream};

// == Keep Alive ==
/// The engine's permanent internal observation of a cached stream.
///
/// Owns the pump task driving the underlying value stream. While the guard
/// lives, the computation keeps running even with zero external observers.
/// Dropping it aborts the pump (cancelling the producer if it is
/// cancellable) and marks the shared stream cancelled so observer streams
/// terminate instead of hanging.
struct KeepAlive<V> {
    task: JoinHandle<()>,
    shared: SharedStream<V>,
}

impl<V> Drop for KeepAlive<V> {
    fn drop(&mut self) {
        self.task.abort();
        self.shared.cancel();
    }
}

// == Cache Entry ==
/// A single cached computation: original key, shared stream, keep-alive.
///
/// The shared stream is fixed for the entry's lifetime. The keep-alive
/// guard is owned exclusively by the entry and never exposed; an entry
/// exists exactly as long as its keep-alive is active.
pub struct CacheEntry<K, V> {
    /// The key as supplied by the caller, retained for `keys()`
    pub original_key: K,
    /// When the entry was created
    pub created_at: DateTime<Utc>,
    shared: SharedStream<V>,
    /// Held for its Drop impl only
    #[allow(dead_code)]
    keep_alive: KeepAlive<V>,
}

impl<K, V: Clone + Send + 'static> CacheEntry<K, V> {
    // == Constructor ==
    /// Wraps a raw value stream and starts pumping it immediately.
    ///
    /// Must be called inside a tokio runtime; the pump task is spawned
    /// synchronously so the producer begins executing at entry creation,
    /// not on first external subscription.
    pub fn new(original_key: K, source: ValueStream<V>) -> Self {
        let (shared, task) = SharedStream::spawn(source);
        Self {
            original_key,
            created_at: Utc::now(),
            keep_alive: KeepAlive {
                task,
                shared: shared.clone(),
            },
            shared,
        }
    }

    // == Shared Stream ==
    /// Returns a handle to the entry's multicast stream.
    pub fn shared(&self) -> SharedStream<V> {
        self.shared.clone()
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;
    use futures::StreamExt;

    use crate::error::ProducerError;

    #[tokio::test]
    async fn test_entry_starts_pump_without_observers() {
        let source = stream::iter(vec![Ok(10), Ok(20)]).boxed();
        let entry = CacheEntry::new("k", source);

        // No subscriber was ever attached; the pump still ran.
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(entry.shared().latest(), Some(20));
        assert!(entry.shared().is_terminated());
    }

    #[tokio::test]
    async fn test_drop_cancels_observers() {
        let source = stream::pending::<Result<i32, ProducerError>>().boxed();
        let entry = CacheEntry::new("k", source);
        let mut sub = entry.shared().subscribe();

        drop(entry);
        assert_eq!(sub.next().await, None);
    }

    #[tokio::test]
    async fn test_entry_records_creation_time() {
        let before = chrono::Utc::now();
        let source = stream::iter(vec![Ok(1)]).boxed();
        let entry = CacheEntry::new("k", source);
        assert!(entry.created_at >= before);
        assert!(entry.created_at <= chrono::Utc::now());
    }

    #[tokio::test]
    async fn test_shared_handles_alias_same_state() {
        let source = stream::iter(vec![Ok(1)]).boxed();
        let entry = CacheEntry::new("k", source);

        let first = entry.shared();
        let second = entry.shared();
        tokio::task::yield_now().await;
        tokio::task::yield_now().await;
        assert_eq!(first.latest(), second.latest());
    }
}
