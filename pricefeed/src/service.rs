//! PriceService
//!
//! The public face of the crate. Responsibilities:
//!   • Own the store, registry, and scheduler, and the tasks driving them
//!   • Hand out per-consumer [`PriceStream`]s with the requested buffering
//!   • Short-circuit identity pairs (base == quote) to a constant 1.0
//!   • Release each consumer's reference when its stream is dropped
//!
//! The background tasks are aborted when the service itself is dropped.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

use common::telemetry::Telemetry;
use fetcher::PriceFetcher;
use pricing::{BufferPolicy, PriceError, PriceKey, PricePoint, PriceStore};
use registry::{Attach, SourceRegistry};
use scheduler::{FetchScheduler, SchedulerConfig};

use crate::config::PriceFeedConfig;
use crate::stream::PriceStream;

pub struct PriceService {
    store: PriceStore,
    registry: SourceRegistry,
    release_tx: mpsc::UnboundedSender<PriceKey>,
    tasks: Vec<JoinHandle<()>>,
}

impl PriceService {
    /// Build the service and spawn its fill, refresh, and release tasks.
    pub fn new<F: PriceFetcher + 'static>(
        fetcher: Arc<F>,
        telemetry: Arc<dyn Telemetry>,
        cfg: PriceFeedConfig,
    ) -> Self {
        let store = PriceStore::new();
        let registry = SourceRegistry::new(store.clone(), cfg.grace_period);

        let scheduler = Arc::new(FetchScheduler::new(
            SchedulerConfig {
                fill_interval: cfg.fill_interval,
                refresh_interval: cfg.refresh_interval,
            },
            registry.clone(),
            store.clone(),
            fetcher,
            telemetry,
        ));

        let (release_tx, mut release_rx) = mpsc::unbounded_channel::<PriceKey>();

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(scheduler.clone().run_fill()));
        tasks.push(tokio::spawn(scheduler.run_refresh()));

        // Stream drops signal releases over a channel so that Drop itself
        // stays synchronous.
        let release_registry = registry.clone();
        tasks.push(tokio::spawn(async move {
            while let Some(key) = release_rx.recv().await {
                release_registry.release(&key).await;
            }
        }));

        Self {
            store,
            registry,
            release_tx,
            tasks,
        }
    }

    /// Subscribe to live updates for `key`.
    ///
    /// The returned stream yields the key's current value first (fetched on
    /// the next fill tick if needed, replayed from cache otherwise), then
    /// every refresh update while the subscription lives. Identity pairs
    /// yield a single synthetic value of 1.0 without touching the network.
    pub async fn subscribe(&self, key: PriceKey, policy: BufferPolicy) -> PriceStream {
        if key.pair.base == key.pair.quote {
            let value = PricePoint {
                timestamp: key.at.unwrap_or_else(Utc::now),
                price: 1.0,
                market_cap: None,
            };
            return PriceStream::identity(key, self.store.clone(), value);
        }

        debug!(%key, "consumer subscribing");

        match self.registry.subscribe(&key).await {
            Attach::Streaming => {
                let stream = self.store.stream(&key, policy).await;
                PriceStream::streaming(key, policy, self.store.clone(), self.release_tx.clone(), stream)
            }
            Attach::Pending(rx) => {
                PriceStream::pending(key, policy, self.store.clone(), self.release_tx.clone(), rx)
            }
        }
    }

    /// One-shot convenience: the key's current value, waiting for a fetch
    /// if none is cached yet.
    pub async fn get_once(&self, key: PriceKey) -> Result<PricePoint, PriceError> {
        let mut stream = self.subscribe(key, BufferPolicy::Unbounded).await;
        match stream.recv().await {
            Some(result) => result,
            None => Err(PriceError::Closed),
        }
    }

    /// Keys with live subscription state, grace-period stragglers included.
    pub async fn active_keys(&self) -> HashSet<PriceKey> {
        self.registry.active_keys().await
    }

    /// Clear the error count for a key stuck at the error cap so scheduled
    /// fetches resume.
    pub async fn reset_errors(&self, key: &PriceKey) {
        self.registry.reset_errors(key).await;
    }
}

impl Drop for PriceService {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
