use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{AppError, Result};

/// Initialize tracing for the process, logging to `gatelink.log` in the
/// working directory through a non-blocking writer.
///
/// `RUST_LOG`, when set and valid, takes precedence over `log_level`
/// (e.g. `RUST_LOG=gatelink::transport=trace`). Fails if a global
/// subscriber is already installed.
pub fn init_tracing(log_level: &str) -> Result<()> {
    let file_appender = tracing_appender::rolling::never(".", "gatelink.log");
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    // RUST_LOG wins over the command line level
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let fmt_layer = fmt::layer()
        .with_writer(non_blocking)
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(true)
        .with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| AppError::ConfigError(format!("Failed to initialize tracing: {}", e)))?;

    // the writer must outlive every span, so the guard lives until exit
    std::mem::forget(guard);

    Ok(())
}
