use std::time::Duration;

#[derive(Clone, Debug)]
pub struct SchedulerConfig {
    /// Cadence of the fill loop: how often keys that have never been
    /// fetched are gathered into one batched request. Bounds how long a
    /// new subscriber waits for its first value.
    pub fill_interval: Duration,

    /// Cadence of the refresh loop: how often every current-price key is
    /// re-fetched, independent of fetch status. This is what keeps
    /// already-satisfied subscribers updated.
    pub refresh_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            fill_interval: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(60),
        }
    }
}
