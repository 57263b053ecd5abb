use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, fmt};

static LOGGER_INIT: OnceCell<()> = OnceCell::new();

/// Install the global tracing subscriber. Safe to call more than once;
/// only the first call takes effect.
///
/// `RUST_LOG` controls the filter; the default is `info`. The per-key
/// fetch and eviction lines sit at `debug`, so
/// `RUST_LOG=registry=debug,scheduler=debug` is the useful diagnostic
/// setting.
pub fn init_logger(service_name: &'static str) {
    LOGGER_INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt().with_env_filter(filter).with_target(true).init();

        tracing::info!(service = service_name, "logger initialized");
    });
}
