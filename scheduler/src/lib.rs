pub mod engine;
pub mod types;

pub use engine::FetchScheduler;
pub use types::SchedulerConfig;
