use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use pricing::PricePoint;

/// Request body entry for `price/index-multi`.
#[derive(Debug, Serialize)]
pub struct PairBody {
    pub base: String,
    pub quote: String,
}

/// Request body entry for `price/index-multi-series`. `time` is unix
/// seconds, stringly typed on the wire.
#[derive(Debug, Serialize)]
pub struct PairAtTimeBody {
    pub base: String,
    pub quote: String,
    pub time: String,
}

/// One quoted price as the index endpoints return it.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexPrice {
    #[serde(with = "chrono::serde::ts_seconds")]
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    #[serde(default, rename = "marketCap")]
    pub market_cap: Option<f64>,
}

impl From<IndexPrice> for PricePoint {
    fn from(p: IndexPrice) -> Self {
        PricePoint {
            timestamp: p.timestamp,
            price: p.price,
            market_cap: p.market_cap,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn decodes_index_multi_response() {
        let body = r#"
        {
            "BTC-GBP": { "price": 22877.5, "timestamp": 1688031472 },
            "ETH-USD": { "price": 1446.6, "timestamp": 1688031472, "marketCap": 173000000000.0 }
        }"#;

        let map: HashMap<String, IndexPrice> = serde_json::from_str(body).unwrap();
        assert_eq!(map["BTC-GBP"].price, 22877.5);
        assert_eq!(map["BTC-GBP"].market_cap, None);
        assert_eq!(map["ETH-USD"].market_cap, Some(173_000_000_000.0));
        assert_eq!(map["ETH-USD"].timestamp.timestamp(), 1_688_031_472);
    }

    #[test]
    fn decodes_index_multi_series_response() {
        let body = r#"
        {
            "BTC-USD": [
                { "price": 28877.5, "timestamp": 1688031472 },
                { "price": 28879.0, "timestamp": 1680192240 }
            ]
        }"#;

        let map: HashMap<String, Vec<IndexPrice>> = serde_json::from_str(body).unwrap();
        assert_eq!(map["BTC-USD"].len(), 2);
        assert_eq!(map["BTC-USD"][1].timestamp.timestamp(), 1_680_192_240);
    }

    #[test]
    fn encodes_time_as_unix_string() {
        let body = PairAtTimeBody {
            base: "BTC".into(),
            quote: "USD".into(),
            time: "1688031472".into(),
        };
        let json = serde_json::to_string(&body).unwrap();
        assert_eq!(
            json,
            r#"{"base":"BTC","quote":"USD","time":"1688031472"}"#
        );
    }
}
