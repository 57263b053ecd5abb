//! The per-consumer price stream handed out by the service.
//!
//! A stream starts in one of three shapes: waiting on the key's first
//! fetch, attached to the store's broadcast, or carrying the single
//! synthetic value of an identity pair. Dropping the stream releases the
//! consumer's reference on the key.

use std::mem;

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use pricing::{BufferPolicy, PriceError, PriceKey, PricePoint, PriceStore, ValueStream};

/// Hands the consumer's reference back to the registry when the stream is
/// dropped, however it is dropped.
struct ReleaseGuard {
    key: PriceKey,
    tx: mpsc::UnboundedSender<PriceKey>,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        // The release worker may already be gone during service shutdown.
        let _ = self.tx.send(self.key.clone());
    }
}

enum StreamState {
    /// Waiting for the key's first fetch to land in the store.
    Pending(oneshot::Receiver<Result<(), PriceError>>),
    /// Reading the store's broadcast for the key.
    Streaming(ValueStream),
    /// Identity pair: one synthetic value, then the stream ends.
    Identity(PricePoint),
    Terminated,
}

/// An async sequence of price updates for one key.
///
/// The first item is the key's current value (fetched or cached); further
/// items are refresh updates, subject to the stream's buffer policy.
/// Errors are terminal.
pub struct PriceStream {
    key: PriceKey,
    policy: BufferPolicy,
    store: PriceStore,
    state: StreamState,
    _guard: Option<ReleaseGuard>,
}

impl PriceStream {
    pub(crate) fn pending(
        key: PriceKey,
        policy: BufferPolicy,
        store: PriceStore,
        release_tx: mpsc::UnboundedSender<PriceKey>,
        rx: oneshot::Receiver<Result<(), PriceError>>,
    ) -> Self {
        let guard = ReleaseGuard {
            key: key.clone(),
            tx: release_tx,
        };
        Self {
            key,
            policy,
            store,
            state: StreamState::Pending(rx),
            _guard: Some(guard),
        }
    }

    pub(crate) fn streaming(
        key: PriceKey,
        policy: BufferPolicy,
        store: PriceStore,
        release_tx: mpsc::UnboundedSender<PriceKey>,
        stream: ValueStream,
    ) -> Self {
        let guard = ReleaseGuard {
            key: key.clone(),
            tx: release_tx,
        };
        Self {
            key,
            policy,
            store,
            state: StreamState::Streaming(stream),
            _guard: Some(guard),
        }
    }

    pub(crate) fn identity(key: PriceKey, store: PriceStore, value: PricePoint) -> Self {
        Self {
            key,
            policy: BufferPolicy::Unbounded,
            store,
            state: StreamState::Identity(value),
            _guard: None,
        }
    }

    /// The key this stream follows.
    pub fn key(&self) -> &PriceKey {
        &self.key
    }

    /// Next update. `None` once the stream has ended, either after a
    /// terminal error or because the key was evicted.
    ///
    /// Not cancel-safe: dropping an in-flight `recv` future ends the
    /// stream.
    pub async fn recv(&mut self) -> Option<Result<PricePoint, PriceError>> {
        loop {
            match mem::replace(&mut self.state, StreamState::Terminated) {
                StreamState::Pending(rx) => match rx.await {
                    Ok(Ok(())) => {
                        // The store now holds the value; attach and let it
                        // replay as the first item.
                        let stream = self.store.stream(&self.key, self.policy).await;
                        self.state = StreamState::Streaming(stream);
                    }
                    Ok(Err(error)) => return Some(Err(error)),
                    Err(_) => {
                        debug!(key = %self.key, "source dropped while stream was pending");
                        return None;
                    }
                },
                StreamState::Streaming(mut stream) => {
                    return match stream.recv().await {
                        Some(value) => {
                            self.state = StreamState::Streaming(stream);
                            Some(Ok(value))
                        }
                        None => None,
                    };
                }
                StreamState::Identity(value) => return Some(Ok(value)),
                StreamState::Terminated => return None,
            }
        }
    }
}
