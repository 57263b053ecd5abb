//! The batch fetch scheduler.
//!
//! Turns the set of outstanding per-key subscriptions into a small number
//! of network round trips. Two independent loops:
//!   1. Fill: gather every key never yet fetched into one batched request.
//!   2. Refresh: re-fetch every current-price key each tick, keeping
//!      already-streaming subscribers updated.
//!
//! Both loops write into the price store first, then let the registry
//! release any consumers waiting on a first value.

use std::collections::HashSet;
use std::sync::Arc;

use futures::future::try_join;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use common::telemetry::Telemetry;
use fetcher::{FetchError, PriceFetcher};
use pricing::{CurrencyPair, PriceError, PriceKey, PricePoint, PriceStore};
use registry::SourceRegistry;

use crate::types::SchedulerConfig;

pub struct FetchScheduler<F: PriceFetcher> {
    cfg: SchedulerConfig,
    registry: SourceRegistry,
    store: PriceStore,
    fetcher: Arc<F>,
    telemetry: Arc<dyn Telemetry>,
}

impl<F: PriceFetcher> FetchScheduler<F> {
    pub fn new(
        cfg: SchedulerConfig,
        registry: SourceRegistry,
        store: PriceStore,
        fetcher: Arc<F>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        Self {
            cfg,
            registry,
            store,
            fetcher,
            telemetry,
        }
    }

    /// Fill loop: runs until aborted.
    pub async fn run_fill(self: Arc<Self>) {
        let mut ticker = interval(self.cfg.fill_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            every_ms = self.cfg.fill_interval.as_millis() as u64,
            "fill loop started"
        );

        loop {
            ticker.tick().await;
            self.fill_tick().await;
        }
    }

    /// Refresh loop: runs until aborted.
    pub async fn run_refresh(self: Arc<Self>) {
        let mut ticker = interval(self.cfg.refresh_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            every_ms = self.cfg.refresh_interval.as_millis() as u64,
            "refresh loop started"
        );

        loop {
            ticker.tick().await;
            self.refresh_tick().await;
        }
    }

    /// One pass of the fill loop: fetch every key never yet fetched, in a
    /// single logical batch. Zero outstanding keys means zero requests.
    pub async fn fill_tick(&self) {
        let batch = self.registry.begin_fill().await;
        if batch.is_empty() {
            return;
        }

        debug!(keys = batch.len(), "issuing fill batch");

        match self.fetch_batch(&batch).await {
            Ok(results) => {
                let requested: HashSet<&PriceKey> = batch.iter().collect();
                let mut resolved = HashSet::with_capacity(results.len());
                for (key, value) in results {
                    // A result the batch never asked for would create a
                    // store entry with no Source to evict it.
                    if !requested.contains(&key) {
                        warn!(%key, "ignoring unrequested price in batch response");
                        continue;
                    }
                    self.store.set(&key, value).await;
                    resolved.insert(key);
                }
                self.registry.on_fill_success(&batch, &resolved).await;
            }
            Err(error) => {
                self.telemetry.transport_failure("fill", &error);
                let error = PriceError::Transport(error.to_string());
                self.registry.on_fill_failure(&batch, &error).await;
            }
        }
    }

    /// One pass of the refresh loop: re-fetch all current-price keys. A
    /// failure here touches no subscription state; streaming consumers
    /// simply miss the tick.
    pub async fn refresh_tick(&self) {
        let keys = self.registry.refresh_candidates().await;
        if keys.is_empty() {
            return;
        }

        let pairs: Vec<CurrencyPair> = keys.iter().map(|k| k.pair.clone()).collect();

        match self.fetcher.fetch_current(&pairs).await {
            Ok(results) => {
                let requested: HashSet<&PriceKey> = keys.iter().collect();
                let mut resolved = HashSet::with_capacity(results.len());
                for (pair, value) in results {
                    let key = PriceKey { pair, at: None };
                    if !requested.contains(&key) {
                        warn!(%key, "ignoring unrequested price in refresh response");
                        continue;
                    }
                    self.store.set(&key, value).await;
                    resolved.insert(key);
                }
                // A refreshed value also satisfies any consumer still
                // waiting on its first one. Keys the response omitted keep
                // their waiters; the fill loop owns those.
                self.registry.on_refresh_success(&resolved).await;
            }
            Err(error) => {
                self.telemetry.transport_failure("refresh", &error);
            }
        }
    }

    /// Issue the two request shapes of one logical batch concurrently.
    /// Either half failing fails the whole batch.
    async fn fetch_batch(
        &self,
        batch: &[PriceKey],
    ) -> Result<Vec<(PriceKey, PricePoint)>, FetchError> {
        let (current, historical): (Vec<PriceKey>, Vec<PriceKey>) =
            batch.iter().cloned().partition(|k| k.is_current());

        let pairs: Vec<CurrencyPair> = current.iter().map(|k| k.pair.clone()).collect();

        let (now, then) = try_join(
            self.fetcher.fetch_current(&pairs),
            self.fetcher.fetch_historical(&historical),
        )
        .await?;

        let mut results: Vec<(PriceKey, PricePoint)> = now
            .into_iter()
            .map(|(pair, value)| (PriceKey { pair, at: None }, value))
            .collect();
        results.extend(then);
        Ok(results)
    }
}
