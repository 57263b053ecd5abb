pub mod error;
pub mod store;
pub mod types;

pub use error::PriceError;
pub use store::{PriceStore, ValueStream};
pub use types::{BufferPolicy, CurrencyPair, PriceKey, PricePoint};
