//! Shared Stream Module
//!
//! Multicast, replay-of-latest wrapper around a producer's value stream.
//!
//! The wrapper is a broadcast primitive with a one-slot last-value buffer:
//! values are fanned out to every registered observer channel, and a newly
//! attached observer first receives the most recently emitted value, if one
//! exists, before any subsequent ones. The underlying stream is driven by a
//! single pump task, so the producer's side effects run once regardless of
//! how many observers attach.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::stream::BoxStream;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::ProducerError;

// == Value Stream ==
/// The raw stream handed to the cache: values until completion, or a
/// terminal [`ProducerError`].
pub type ValueStream<V> = BoxStream<'static, Result<V, ProducerError>>;

// == Terminal State ==
/// Why a shared stream stopped producing.
#[derive(Debug, Clone)]
enum Terminal {
    /// The underlying stream ran to completion
    Completed,
    /// The underlying stream failed
    Failed(ProducerError),
    /// The cache released its keep-alive observation
    Cancelled,
}

// == Fan-out State ==
/// State shared between the pump task and all observers.
struct Inner<V> {
    /// One-slot replay buffer holding the most recent value
    latest: Option<V>,
    /// Set once the stream stops producing; never cleared
    terminal: Option<Terminal>,
    /// Live observer channels
    senders: Vec<mpsc::UnboundedSender<Result<V, ProducerError>>>,
}

// == Shared Stream ==
/// A multicast, replay-latest view over a single underlying value stream.
///
/// Cloning is cheap and every clone observes the same state. Attach an
/// observer with [`subscribe`](SharedStream::subscribe); detaching (dropping
/// the subscription) never affects other observers or the underlying
/// computation.
pub struct SharedStream<V> {
    inner: Arc<Mutex<Inner<V>>>,
}

impl<V> Clone for SharedStream<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V> SharedStream<V> {
    fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                latest: None,
                terminal: None,
                senders: Vec::new(),
            })),
        }
    }

    // == Is Terminated ==
    /// Returns true once the stream has completed, failed or been cancelled.
    pub fn is_terminated(&self) -> bool {
        self.inner.lock().terminal.is_some()
    }

    // == Complete ==
    /// Marks the stream completed and closes every observer channel.
    pub(crate) fn complete(&self) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        inner.terminal = Some(Terminal::Completed);
        inner.senders.clear();
    }

    // == Cancel ==
    /// Marks the stream cancelled and closes every observer channel.
    ///
    /// Used when the cache releases its keep-alive observation; observers
    /// see end-of-stream rather than hanging on a stream nobody drives.
    pub(crate) fn cancel(&self) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        inner.terminal = Some(Terminal::Cancelled);
        inner.senders.clear();
    }
}

impl<V: Clone> SharedStream<V> {
    // == Latest ==
    /// Returns the most recently emitted value, if any.
    pub fn latest(&self) -> Option<V> {
        self.inner.lock().latest.clone()
    }

    // == Subscribe ==
    /// Attaches a new observer.
    ///
    /// The observer immediately receives the buffered latest value if one
    /// exists, then every value emitted afterwards in emission order. If the
    /// stream already terminated, the buffered value (if any) is followed by
    /// the terminal event: an `Err` for a failed stream, end-of-stream for a
    /// completed or cancelled one.
    pub fn subscribe(&self) -> Subscription<V> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut guard = self.inner.lock();
        let inner = &mut *guard;

        if let Some(value) = &inner.latest {
            // Receiver is not consumed yet, the send cannot fail.
            let _ = tx.send(Ok(value.clone()));
        }

        match &inner.terminal {
            None => inner.senders.push(tx),
            Some(Terminal::Failed(err)) => {
                let _ = tx.send(Err(err.clone()));
                // tx drops here, closing the channel after the error.
            }
            Some(Terminal::Completed) | Some(Terminal::Cancelled) => {
                // tx drops here, closing the channel after the replay.
            }
        }

        Subscription { rx }
    }

    // == Publish ==
    /// Stores a value in the replay buffer and fans it out to observers.
    ///
    /// No-op after termination. Observers whose channel is gone are dropped
    /// from the fan-out set.
    pub(crate) fn publish(&self, value: V) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        inner.latest = Some(value.clone());
        inner
            .senders
            .retain(|tx| tx.send(Ok(value.clone())).is_ok());
    }

    // == Fail ==
    /// Marks the stream failed, delivering the error to every observer.
    pub(crate) fn fail(&self, err: ProducerError) {
        let mut inner = self.inner.lock();
        if inner.terminal.is_some() {
            return;
        }
        inner.terminal = Some(Terminal::Failed(err.clone()));
        for tx in inner.senders.drain(..) {
            let _ = tx.send(Err(err.clone()));
        }
    }
}

impl<V: Clone + Send + 'static> SharedStream<V> {
    // == Spawn ==
    /// Wraps a raw value stream and spawns the pump task driving it.
    ///
    /// The pump starts immediately, independent of external observers; the
    /// returned handle is the cache's keep-alive lever. Aborting it drops
    /// the source stream, cancelling the producer if it is cancellable.
    pub(crate) fn spawn(source: ValueStream<V>) -> (Self, JoinHandle<()>) {
        let shared = Self::new();
        let state = shared.clone();

        let handle = tokio::spawn(async move {
            let mut source = source;
            while let Some(item) = source.next().await {
                match item {
                    Ok(value) => state.publish(value),
                    Err(err) => {
                        debug!("producer stream failed: {}", err);
                        state.fail(err);
                        return;
                    }
                }
            }
            debug!("producer stream completed");
            state.complete();
        });

        (shared, handle)
    }
}

// == Subscription ==
/// An observer's view of a [`SharedStream`].
///
/// Yields `Ok(value)` items in emission order and ends after the shared
/// stream terminates; a failed stream yields one final `Err` first.
/// Dropping the subscription detaches the observer.
pub struct Subscription<V> {
    rx: mpsc::UnboundedReceiver<Result<V, ProducerError>>,
}

impl<V> Stream for Subscription<V> {
    type Item = Result<V, ProducerError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}
