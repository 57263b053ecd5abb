//! Live price subscription multiplexer.
//!
//! Many concurrent consumers ask for "the price of pair P at time T"; the
//! service coalesces them into periodic batched fetches, caches results per
//! key, fans each fetched value out to every interested subscriber, and
//! evicts unused keys after a grace period.

pub mod config;
pub mod service;
pub mod stream;

pub use config::PriceFeedConfig;
pub use service::PriceService;
pub use stream::PriceStream;

pub use pricing::{BufferPolicy, CurrencyPair, PriceError, PriceKey, PricePoint};
