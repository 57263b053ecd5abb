use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A base/quote currency pair, e.g. BTC-USD.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CurrencyPair {
    pub base: String,
    pub quote: String,
}

impl CurrencyPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            quote: quote.into(),
        }
    }

    /// Canonical wire identifier, `"BASE-QUOTE"`.
    pub fn id(&self) -> String {
        format!("{}-{}", self.base, self.quote)
    }

    /// Parse a `"BASE-QUOTE"` identifier.
    pub fn parse(id: &str) -> Option<Self> {
        let (base, quote) = id.split_once('-')?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(Self::new(base, quote))
    }
}

impl std::fmt::Display for CurrencyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.base, self.quote)
    }
}

/// Identifies one subscribable price: a pair, optionally pinned to a point
/// in time.
///
/// `at == None` means "current price": the refresh loop keeps re-fetching it.
/// `at == Some(t)` means "historical price": fetched once, never refreshed.
/// Immutable once created; equality and hashing are structural.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PriceKey {
    pub pair: CurrencyPair,
    pub at: Option<DateTime<Utc>>,
}

impl PriceKey {
    pub fn current(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            pair: CurrencyPair::new(base, quote),
            at: None,
        }
    }

    pub fn historical(
        base: impl Into<String>,
        quote: impl Into<String>,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            pair: CurrencyPair::new(base, quote),
            at: Some(at),
        }
    }

    /// Whether this key asks for the live price rather than a point in time.
    pub fn is_current(&self) -> bool {
        self.at.is_none()
    }
}

impl std::fmt::Display for PriceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.at {
            Some(at) => write!(f, "{}@{}", self.pair, at.timestamp()),
            None => write!(f, "{}", self.pair),
        }
    }
}

/// One quoted price. Replaced wholesale on every update, never mutated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: DateTime<Utc>,
    pub price: f64,
    pub market_cap: Option<f64>,
}

/// How a slow consumer's queue behaves.
///
/// `Unbounded` never drops an update. `DropOldest(n)` keeps the most recent
/// `n` updates and silently discards the oldest on overflow, so a stalled
/// consumer can never block the writer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BufferPolicy {
    Unbounded,
    DropOldest(usize),
}

impl Default for BufferPolicy {
    fn default() -> Self {
        Self::Unbounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn pair_id_round_trips() {
        let pair = CurrencyPair::new("BTC", "USD");
        assert_eq!(pair.id(), "BTC-USD");
        assert_eq!(CurrencyPair::parse("BTC-USD"), Some(pair));
        assert_eq!(CurrencyPair::parse("BTCUSD"), None);
        assert_eq!(CurrencyPair::parse("-USD"), None);
    }

    #[test]
    fn keys_with_distinct_times_are_distinct() {
        let now = PriceKey::current("ETH", "USD");
        let yesterday =
            PriceKey::historical("ETH", "USD", Utc.timestamp_opt(1_688_031_472, 0).unwrap());
        assert_ne!(now, yesterday);
        assert!(now.is_current());
        assert!(!yesterday.is_current());
    }
}
