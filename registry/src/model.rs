use tokio::sync::oneshot;

use pricing::PriceError;

/// Consecutive transport failures after which a key is excluded from
/// scheduled fetches until an explicit reset.
pub const ERROR_CAP: u32 = 2;

/// A consumer queued for a key's first-ever value. Resolved with `Ok(())`
/// once the store holds a value to attach to, or with the error that ended
/// the wait.
pub type PendingWaiter = oneshot::Sender<Result<(), PriceError>>;

/// Per-key subscription bookkeeping. Owned exclusively by the registry;
/// every mutation goes through the registry's mutex.
pub struct Source {
    /// True once a fetch for this key has been issued and not failed.
    /// Flipped on optimistically before the batch goes out, so one tick
    /// never fetches the same key twice.
    pub fetched: bool,

    /// Latest transport failure, kept for diagnostics.
    pub error: Option<PriceError>,

    /// Consecutive transport failures. Not reset on success; only
    /// `SourceRegistry::reset_errors` clears it.
    pub error_count: u32,

    /// Currently-live consumers.
    pub reference_count: usize,

    /// Countdown token for grace-period eviction. Bumped when the last
    /// consumer leaves and again when a new one arrives, so a deferred
    /// eviction holding a stale token becomes a no-op.
    pub cancel_generation: u64,

    /// Present only while the key has never produced a value.
    pub pending: Option<Vec<PendingWaiter>>,
}

impl Source {
    /// Source for a key with no cached value: its first consumer waits for
    /// the first fetch.
    pub fn pending(waiter: PendingWaiter) -> Self {
        Self {
            fetched: false,
            error: None,
            error_count: 0,
            reference_count: 1,
            cancel_generation: 0,
            pending: Some(vec![waiter]),
        }
    }

    /// Source for a key that already has a cached value: its consumer
    /// attaches to the store directly.
    pub fn streaming() -> Self {
        Self {
            fetched: true,
            error: None,
            error_count: 0,
            reference_count: 1,
            cancel_generation: 0,
            pending: None,
        }
    }

    /// Eligible for the next fill batch.
    pub fn is_fillable(&self) -> bool {
        !self.fetched && self.error_count < ERROR_CAP
    }
}
