//! Error types for the reactive cache
//!
//! Provides unified error handling using thiserror.
//!
//! Two families exist: [`CacheError`] covers synchronous key failures raised
//! before any store mutation, while [`ProducerError`] is the terminal failure
//! of a value stream and flows to observers asynchronously.

use std::sync::Arc;

use thiserror::Error;

// == Cache Error Enum ==
/// Synchronous error raised by cache operations.
///
/// All variants are invalid-key failures from the normalizer. They abort the
/// calling operation before the store is touched or a producer is invoked.
#[derive(Error, Debug)]
pub enum CacheError {
    /// The key was the null value
    #[error("Invalid key: null keys are not allowed")]
    NullKey,

    /// The key normalized to an empty string (e.g. a record with no fields)
    #[error("Invalid key: {key} normalized to the empty string {normalized:?}")]
    EmptyKey {
        /// Textual form of the original key, for diagnosis
        key: String,
        /// The computed canonical string (always empty here)
        normalized: String,
    },

    /// The key could not be converted to a structured value
    #[error("Invalid key: {0}")]
    UnsupportedKey(String),
}

// == Producer Error ==
/// Terminal failure emitted by an underlying producer stream.
///
/// Cloneable so a single failure can be fanned out to every observer of a
/// shared stream. After an observer receives `Err(ProducerError)`, its
/// stream ends; the failed entry stays cached until explicitly cleared.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Producer failed: {message}")]
pub struct ProducerError {
    message: Arc<str>,
}

impl ProducerError {
    /// Creates a new producer failure with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: Arc::from(message.into()),
        }
    }

    /// Returns the failure message.
    pub fn message(&self) -> &str {
        &self.message
    }
}

// == Result Type Alias ==
/// Convenience Result type for cache operations.
pub type Result<T> = std::result::Result<T, CacheError>;
