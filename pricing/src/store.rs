//! Per-key price cache with broadcast fan-out.
//!
//! The store holds the latest value for every key and pushes each update to
//! every attached consumer of that key, in write order. Consumers that
//! attach after a value exists receive that value immediately as their first
//! item. The store is its own serialization domain; it never shares a lock
//! with the registry's bookkeeping.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast, mpsc};

use crate::types::{BufferPolicy, PriceKey, PricePoint};

/// One attached consumer's queue.
enum Tap {
    Unbounded(mpsc::UnboundedSender<PricePoint>),
    DropOldest(broadcast::Sender<PricePoint>),
}

impl Tap {
    /// Push an update; false once the consumer is gone.
    fn push(&self, value: &PricePoint) -> bool {
        match self {
            Tap::Unbounded(tx) => tx.send(value.clone()).is_ok(),
            Tap::DropOldest(tx) => tx.send(value.clone()).is_ok(),
        }
    }
}

#[derive(Default)]
struct Entry {
    latest: Option<PricePoint>,
    taps: Vec<Tap>,
}

/// Concurrency-safe cache mapping each price key to its most recent value,
/// broadcasting every update to all attached consumers of that key.
#[derive(Clone, Default)]
pub struct PriceStore {
    inner: Arc<RwLock<HashMap<PriceKey, Entry>>>,
}

impl PriceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the cached value for `key` and push it to every attached
    /// consumer. Dead taps are pruned here.
    pub async fn set(&self, key: &PriceKey, value: PricePoint) {
        let mut guard = self.inner.write().await;
        let entry = guard.entry(key.clone()).or_default();
        entry.latest = Some(value.clone());
        entry.taps.retain(|tap| tap.push(&value));
    }

    /// Latest cached value for `key`, if any.
    pub async fn get(&self, key: &PriceKey) -> Option<PricePoint> {
        let guard = self.inner.read().await;
        guard.get(key).and_then(|e| e.latest.clone())
    }

    /// Whether a value has ever been cached for `key`. A key that only has
    /// consumers attached (no value yet) does not count.
    pub async fn contains(&self, key: &PriceKey) -> bool {
        let guard = self.inner.read().await;
        guard.get(key).is_some_and(|e| e.latest.is_some())
    }

    /// Attach a fresh, independent consumer sequence for `key`.
    ///
    /// The sequence replays the latest cached value (if one exists) as its
    /// first item, then yields future updates. Dropping one sequence never
    /// affects the others.
    pub async fn stream(&self, key: &PriceKey, policy: BufferPolicy) -> ValueStream {
        let mut guard = self.inner.write().await;
        let entry = guard.entry(key.clone()).or_default();

        let (tap, rx) = match policy {
            BufferPolicy::Unbounded => {
                let (tx, rx) = mpsc::unbounded_channel();
                (Tap::Unbounded(tx), ValueRx::Unbounded(rx))
            }
            BufferPolicy::DropOldest(cap) => {
                let (tx, rx) = broadcast::channel(cap.max(1));
                (Tap::DropOldest(tx), ValueRx::DropOldest(rx))
            }
        };

        entry.taps.push(tap);

        ValueStream {
            first: entry.latest.clone(),
            rx,
        }
    }

    /// Drop the cached value and every attached tap for `key`. Live
    /// sequences for the key end on their next poll.
    pub async fn evict(&self, key: &PriceKey) {
        let mut guard = self.inner.write().await;
        guard.remove(key);
    }
}

enum ValueRx {
    Unbounded(mpsc::UnboundedReceiver<PricePoint>),
    DropOldest(broadcast::Receiver<PricePoint>),
}

/// One consumer's view of a key: latest value first, then updates in write
/// order. Ends when the key is evicted from the store.
pub struct ValueStream {
    first: Option<PricePoint>,
    rx: ValueRx,
}

impl ValueStream {
    /// Next value, or `None` once the key has been evicted.
    pub async fn recv(&mut self) -> Option<PricePoint> {
        if let Some(v) = self.first.take() {
            return Some(v);
        }
        match &mut self.rx {
            ValueRx::Unbounded(rx) => rx.recv().await,
            ValueRx::DropOldest(rx) => loop {
                match rx.recv().await {
                    Ok(v) => break Some(v),
                    // Overflowed consumers skip the dropped items and
                    // continue from the oldest retained update.
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break None,
                }
            },
        }
    }
}
