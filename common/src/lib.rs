pub mod logger;
pub mod telemetry;
