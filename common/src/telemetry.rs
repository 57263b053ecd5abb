//! Telemetry port for fetch failures.
//!
//! The scheduler reports every transport failure here instead of posting to
//! a process-wide event bus. The host application injects its own sink; the
//! default forwards to `tracing`.

use std::error::Error;

/// Sink for failures that are recovered internally but still need to reach
/// monitoring in the host application.
pub trait Telemetry: Send + Sync {
    /// A batched fetch failed wholesale. `context` names the loop that
    /// issued it (`"fill"` or `"refresh"`).
    fn transport_failure(&self, context: &'static str, error: &dyn Error);
}

/// Default sink: structured log records via `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogTelemetry;

impl Telemetry for LogTelemetry {
    fn transport_failure(&self, context: &'static str, error: &dyn Error) {
        tracing::error!(context, %error, "price fetch transport failure");
    }
}
