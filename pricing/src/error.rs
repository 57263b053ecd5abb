use thiserror::Error;

use crate::types::PriceKey;

/// Errors surfaced to price subscribers.
///
/// Cloneable so one failure can be delivered to every consumer waiting on
/// the same key.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PriceError {
    /// The batched fetch itself failed. Retried on the next fill tick, up
    /// to the per-key error cap.
    #[error("transport error: {0}")]
    Transport(String),

    /// The batch succeeded but the server omitted this key. Terminal for
    /// the consumers that were waiting on it.
    #[error("no price returned for {0}")]
    MissingPrice(PriceKey),

    /// The stream ended before producing a value.
    #[error("price stream closed before a value was produced")]
    Closed,
}
