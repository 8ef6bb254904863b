//! # Logging
//!
//! Transactions log through `tracing`:
//!
//! - `debug`: lifecycle (created, headers sent, EOM, abort, detach)
//! - `trace`: per-event detail (queueing, window updates, rate limiting)
//! - `warn`/`error`: peer protocol violations and refused operations
//!
//! Nothing is logged per body byte. The embedding application installs a
//! subscriber once at startup with [`init_logging`]; `RUST_LOG` overrides
//! the configured level.

use anyhow::{anyhow, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global `fmt` subscriber.
///
/// # Errors
///
/// Fails if the filter directive is invalid or a global subscriber is
/// already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_string()))
        .map_err(|e| anyhow!("invalid log filter: {}", e))?;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_thread_ids(false)
        .with_line_number(config.include_file_line)
        .with_file(config.include_file_line);

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| anyhow!("logging already initialized: {}", e))?;

    tracing::info!(level = %config.level, "Logging initialized");
    Ok(())
}

/// Test-friendly subscriber: writes through the test harness capture and
/// tolerates being called from every test.
pub fn init_test_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .try_init();
}
