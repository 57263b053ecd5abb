use std::time::Duration;

/// Tunables for the price feed service.
#[derive(Debug, Clone)]
pub struct PriceFeedConfig {
    /// How often the fill loop sweeps for keys that still lack a first
    /// value.
    pub fill_interval: Duration,

    /// How often every active current-price key is re-fetched for
    /// streaming subscribers.
    pub refresh_interval: Duration,

    /// How long a key with zero subscribers keeps its state and cached
    /// value before eviction. Zero evicts immediately.
    pub grace_period: Duration,
}

impl Default for PriceFeedConfig {
    fn default() -> Self {
        Self {
            fill_interval: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
            grace_period: Duration::from_secs(5),
        }
    }
}
