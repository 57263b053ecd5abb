//! SourceRegistry
//!
//! Single authority for creating, looking up, and destroying per-key
//! subscription state. Responsibilities:
//!   • Decide on subscribe whether a consumer attaches to the store's
//!     broadcast or waits for the key's first fetch
//!   • Hand the scheduler its fill batches (optimistic fetched flag)
//!   • Apply fetch outcomes: drain pending waiters, track error counts
//!   • Evict idle keys after the grace period, store entry included
//!
//! All Source mutation is serialized through one mutex with short critical
//! sections; the lock is never held across an awaited network call. Store
//! lookups and evictions that decide or follow from Source lifecycle happen
//! under that same mutex, so a key's Source and its cached value appear and
//! disappear together.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, oneshot};
use tracing::{debug, warn};

use pricing::{PriceError, PriceKey, PriceStore};

use crate::model::{ERROR_CAP, Source};

/// How a new consumer should obtain its first value.
pub enum Attach {
    /// Read the store's broadcast directly; a cached value replays
    /// immediately.
    Streaming,
    /// Wait for the key's first fetch; resolves to `Ok(())` once the store
    /// holds a value, or to the error that ended the wait.
    Pending(oneshot::Receiver<Result<(), PriceError>>),
}

#[derive(Clone)]
pub struct SourceRegistry {
    sources: Arc<Mutex<HashMap<PriceKey, Source>>>,
    store: PriceStore,
    grace_period: Duration,
}

impl SourceRegistry {
    pub fn new(store: PriceStore, grace_period: Duration) -> Self {
        Self {
            sources: Arc::new(Mutex::new(HashMap::new())),
            store,
            grace_period,
        }
    }

    /// Register a new consumer for `key`, creating its Source on first
    /// subscription. A subscription arriving while the grace-period
    /// countdown is running revives the Source and invalidates the pending
    /// eviction.
    pub async fn subscribe(&self, key: &PriceKey) -> Attach {
        let mut sources = self.sources.lock().await;
        match sources.get_mut(key) {
            Some(source) => {
                if source.reference_count == 0 {
                    source.cancel_generation += 1;
                }
                source.reference_count += 1;

                match source.pending.as_mut() {
                    Some(waiters) => {
                        let (tx, rx) = oneshot::channel();
                        waiters.push(tx);
                        Attach::Pending(rx)
                    }
                    None => Attach::Streaming,
                }
            }
            None => {
                // Checked under the sources lock so an eviction cannot slip
                // between the cache lookup and the insert.
                if self.store.contains(key).await {
                    sources.insert(key.clone(), Source::streaming());
                    Attach::Streaming
                } else {
                    let (tx, rx) = oneshot::channel();
                    sources.insert(key.clone(), Source::pending(tx));
                    debug!(%key, "source created");
                    Attach::Pending(rx)
                }
            }
        }
    }

    /// A consumer's stream was torn down. At zero live consumers the key
    /// enters the grace-period countdown (or is evicted immediately when
    /// the grace period is zero).
    pub async fn release(&self, key: &PriceKey) {
        let mut sources = self.sources.lock().await;
        let Some(source) = sources.get_mut(key) else {
            warn!(%key, "release of non-existent source");
            return;
        };

        source.reference_count = source.reference_count.saturating_sub(1);
        if source.reference_count > 0 {
            return;
        }

        if self.grace_period.is_zero() {
            // Source and store entry go together, under one lock.
            sources.remove(key);
            self.store.evict(key).await;
            debug!(%key, "source evicted");
            return;
        }

        source.cancel_generation += 1;
        let token = source.cancel_generation;
        drop(sources);

        let registry = self.clone();
        let key = key.clone();
        tokio::spawn(async move {
            tokio::time::sleep(registry.grace_period).await;
            registry.evict_if_stale(&key, token).await;
        });
    }

    /// Deferred half of the grace-period countdown: evicts only if no
    /// consumer arrived since the token was captured. Source and store
    /// entry are removed under the same lock, so a concurrent subscribe
    /// sees either both or neither.
    async fn evict_if_stale(&self, key: &PriceKey, token: u64) {
        let mut sources = self.sources.lock().await;
        if let Some(s) = sources.get(key) {
            if s.reference_count == 0 && s.cancel_generation == token {
                sources.remove(key);
                self.store.evict(key).await;
                debug!(%key, "source evicted after grace period");
            }
        }
    }

    /// Collect the keys the next fill batch should cover and flip their
    /// fetched flag before the request goes out, so a key is never fetched
    /// twice in the same tick. Keys at the error cap are skipped until an
    /// explicit reset.
    pub async fn begin_fill(&self) -> Vec<PriceKey> {
        let mut sources = self.sources.lock().await;
        let mut batch = Vec::new();
        for (key, source) in sources.iter_mut() {
            if source.is_fillable() {
                source.fetched = true;
                batch.push(key.clone());
            }
        }
        batch
    }

    /// The batch came back. Pending waiters of every resolved key are
    /// released to read the store; waiters of keys the server omitted get a
    /// terminal missing-price error (which does not count against the
    /// error cap).
    pub async fn on_fill_success(&self, requested: &[PriceKey], resolved: &HashSet<PriceKey>) {
        let mut sources = self.sources.lock().await;
        for key in requested {
            let Some(source) = sources.get_mut(key) else {
                continue;
            };

            if resolved.contains(key) {
                source.error = None;
                if let Some(waiters) = source.pending.take() {
                    for waiter in waiters {
                        let _ = waiter.send(Ok(()));
                    }
                }
            } else if let Some(waiters) = source.pending.take() {
                warn!(%key, "price missing from batch response");
                for waiter in waiters {
                    let _ = waiter.send(Err(PriceError::MissingPrice(key.clone())));
                }
            }
        }
    }

    /// A refresh batch came back. Waiters drain only for keys the response
    /// actually delivered; an omission here is not terminal, the key's own
    /// fill batch may still be in flight.
    pub async fn on_refresh_success(&self, resolved: &HashSet<PriceKey>) {
        let mut sources = self.sources.lock().await;
        for key in resolved {
            let Some(source) = sources.get_mut(key) else {
                continue;
            };

            source.error = None;
            if let Some(waiters) = source.pending.take() {
                for waiter in waiters {
                    let _ = waiter.send(Ok(()));
                }
            }
        }
    }

    /// The batch failed wholesale. Every requested key is rolled back for
    /// retry on the next fill tick (up to the cap) and its pending waiters
    /// receive the failure.
    pub async fn on_fill_failure(&self, requested: &[PriceKey], error: &PriceError) {
        let mut sources = self.sources.lock().await;
        for key in requested {
            let Some(source) = sources.get_mut(key) else {
                continue;
            };

            source.fetched = false;
            source.error_count += 1;
            source.error = Some(error.clone());

            if source.error_count >= ERROR_CAP {
                warn!(%key, "error cap reached, key excluded from scheduled fetches");
            }

            if let Some(waiters) = source.pending.take() {
                for waiter in waiters {
                    let _ = waiter.send(Err(error.clone()));
                }
            }
        }
    }

    /// Every current-price key, regardless of fetch status. The refresh
    /// loop re-fetches all of them each tick.
    pub async fn refresh_candidates(&self) -> Vec<PriceKey> {
        let sources = self.sources.lock().await;
        sources
            .keys()
            .filter(|k| k.is_current())
            .cloned()
            .collect()
    }

    /// Explicit external reset for a key stuck at the error cap: clears the
    /// count and re-arms the fill loop.
    pub async fn reset_errors(&self, key: &PriceKey) {
        let mut sources = self.sources.lock().await;
        if let Some(source) = sources.get_mut(key) {
            source.error = None;
            source.error_count = 0;
            source.fetched = false;
        }
    }

    /// Keys with live subscription state, for diagnostics and tests.
    pub async fn active_keys(&self) -> HashSet<PriceKey> {
        let sources = self.sources.lock().await;
        sources.keys().cloned().collect()
    }
}
