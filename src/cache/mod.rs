//! Cache Module
//!
//! Provides the keyed store of shared, multicast stream computations.

use crate::error::Result;

mod entry;
mod shared;
mod stats;
mod store;


// Re-export public types
pub use entry::CacheEntry;
pub use shared::{SharedStream, Subscription, ValueStream};
pub use stats::CacheStats;
pub use store::{KeyNormalizer, Producer, ReactiveCache};

// == Cache Contract ==
/// The generic cache contract satisfied by [`ReactiveCache`].
///
/// Store mutation is synchronous; values arrive asynchronously through the
/// returned [`SharedStream`]s.
pub trait Cache<K, V> {
    /// Count of live entries.
    fn size(&self) -> usize;

    /// Original keys of all live entries, in store iteration order.
    fn keys(&self) -> Vec<K>;

    /// Returns the shared stream for `key`, invoking the producer on a miss.
    fn get(&mut self, key: &K) -> Result<SharedStream<V>>;

    /// Installs a caller-supplied value stream, replacing any existing entry.
    fn set(&mut self, key: &K, source: ValueStream<V>) -> Result<()>;

    /// Destroys the entry for `key`; missing entries are a no-op.
    fn delete(&mut self, key: &K) -> Result<()>;

    /// Destroys every live entry.
    fn delete_all(&mut self);
}
