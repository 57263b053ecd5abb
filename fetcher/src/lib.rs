//! Fetch-executor boundary for batched price requests.
//!
//! The scheduler only ever talks to the `PriceFetcher` trait; the production
//! implementation (`IndexPriceClient`) speaks to the wallet backend's batched
//! index-price endpoints over HTTP.

pub mod client;
pub mod errors;
pub mod types;

use async_trait::async_trait;

use pricing::{CurrencyPair, PriceKey, PricePoint};

pub use client::IndexPriceClient;
pub use errors::FetchError;

/// Performs the actual batched network requests. Stateless from the
/// scheduler's point of view; invoked at most once per tick per loop.
#[async_trait]
pub trait PriceFetcher: Send + Sync {
    /// Current price for each pair, one round trip for the whole batch.
    async fn fetch_current(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<Vec<(CurrencyPair, PricePoint)>, FetchError>;

    /// Historical price for each (pair, time) key, one round trip for the
    /// whole batch.
    async fn fetch_historical(
        &self,
        keys: &[PriceKey],
    ) -> Result<Vec<(PriceKey, PricePoint)>, FetchError>;
}
