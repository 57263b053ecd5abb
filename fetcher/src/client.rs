use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, instrument};

use pricing::{CurrencyPair, PriceKey, PricePoint};

use crate::errors::FetchError;
use crate::types::{IndexPrice, PairAtTimeBody, PairBody};
use crate::PriceFetcher;

pub const DEFAULT_BASE_URL: &str = "https://api.blockchain.info";

/// HTTP implementation of [`PriceFetcher`] against the batched index-price
/// endpoints (`price/index-multi`, `price/index-multi-series`).
#[derive(Clone)]
pub struct IndexPriceClient {
    http: Client,
    base_url: String,
}

impl IndexPriceClient {
    pub fn new(base_url: impl Into<String>) -> Result<Self, FetchError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(5))
            .pool_idle_timeout(Duration::from_secs(30))
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            http,
            base_url: base_url.into(),
        })
    }
}

#[async_trait]
impl PriceFetcher for IndexPriceClient {
    #[instrument(skip(self, pairs), fields(batch = pairs.len()), level = "debug")]
    async fn fetch_current(
        &self,
        pairs: &[CurrencyPair],
    ) -> Result<Vec<(CurrencyPair, PricePoint)>, FetchError> {
        if pairs.is_empty() {
            return Ok(vec![]);
        }

        let body: Vec<PairBody> = pairs
            .iter()
            .map(|p| PairBody {
                base: p.base.clone(),
                quote: p.quote.clone(),
            })
            .collect();

        let url = format!("{}/price/index-multi", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let prices: HashMap<String, IndexPrice> = resp.json().await?;

        debug!(returned = prices.len(), "index-multi fetched");

        prices
            .into_iter()
            .map(|(id, price)| {
                let pair =
                    CurrencyPair::parse(&id).ok_or_else(|| FetchError::MalformedPair(id))?;
                Ok((pair, price.into()))
            })
            .collect()
    }

    #[instrument(skip(self, keys), fields(batch = keys.len()), level = "debug")]
    async fn fetch_historical(
        &self,
        keys: &[PriceKey],
    ) -> Result<Vec<(PriceKey, PricePoint)>, FetchError> {
        if keys.is_empty() {
            return Ok(vec![]);
        }

        let body: Vec<PairAtTimeBody> = keys
            .iter()
            .filter_map(|k| {
                let at = k.at?;
                Some(PairAtTimeBody {
                    base: k.pair.base.clone(),
                    quote: k.pair.quote.clone(),
                    time: at.timestamp().to_string(),
                })
            })
            .collect();

        let url = format!("{}/price/index-multi-series", self.base_url);
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?;

        let series: HashMap<String, Vec<IndexPrice>> = resp.json().await?;

        debug!(returned = series.len(), "index-multi-series fetched");

        Ok(match_series(keys, &series))
    }
}

/// Re-key series results to the keys that requested them. The server quotes
/// its own timestamp, which may be rounded from the requested time, so each
/// key takes the entry closest to the time it asked for.
fn match_series(
    keys: &[PriceKey],
    series: &HashMap<String, Vec<IndexPrice>>,
) -> Vec<(PriceKey, PricePoint)> {
    let mut out = Vec::with_capacity(keys.len());
    for key in keys {
        let Some(at) = key.at else {
            continue;
        };
        let Some(prices) = series.get(&key.pair.id()) else {
            continue;
        };
        let closest = prices
            .iter()
            .min_by_key(|p| (p.timestamp - at).num_seconds().abs());
        if let Some(price) = closest {
            out.push((key.clone(), price.clone().into()));
        }
    }
    out
}
