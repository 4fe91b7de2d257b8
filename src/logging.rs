//! Tracing setup shared by both binaries.

use anyhow::{anyhow, Result};
use std::path::Path;
use std::sync::Mutex;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Map `-v` counts to a level: 0=error, 1=warn, 2=info, 3=debug, 4+=trace.
pub fn level_for(verbosity: u8) -> &'static str {
    match verbosity {
        0 => "error",
        1 => "warn",
        2 => "info",
        3 => "debug",
        _ => "trace",
    }
}

/// Install the global subscriber. `RUST_LOG` overrides the verbosity mapping.
/// With `log_file`, diagnostics are appended there (without ANSI) as well as
/// printed to stderr.
pub fn init_logging(verbosity: u8, log_file: Option<&Path>) -> Result<()> {
    let level = level_for(verbosity);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ferry={},ferryd={}", level, level)));

    let stderr = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(verbosity >= 3)
        .with_thread_names(verbosity >= 3);

    let file_layer = match log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?;
            Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr)
        .with(file_layer)
        .try_init()
        .map_err(|e| anyhow!("failed to initialize logging: {}", e))
}
