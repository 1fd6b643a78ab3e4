//! Diagnostic logging setup.
//!
//! Installs a `tracing_subscriber` fmt layer. `RUST_LOG` wins over the
//! configured level so a single run can be turned up without editing the file.

use anyhow::{anyhow, Result};
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

pub fn init(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.level)
            .map_err(|e| anyhow!("Invalid log level {:?}: {}", config.level, e))?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(config.ansi)
        .try_init()
        .map_err(|e| anyhow!("Failed to install log subscriber: {}", e))
}
