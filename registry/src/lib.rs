pub mod manager;
pub mod model;

pub use manager::{Attach, SourceRegistry};
pub use model::{ERROR_CAP, Source};
