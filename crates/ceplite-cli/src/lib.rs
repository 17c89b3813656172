//! ceplite CLI library - testable functions and modules
//!
//! Configuration loading, synthetic producers and the two demo pipelines
//! behind the `ceplite` binary.

pub mod config;
pub mod demo;
pub mod simulator;

use anyhow::Result;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
pub fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&logging.level))?;
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match logging.format.to_lowercase().as_str() {
        "json" => builder.json().try_init(),
        "text" | "" => builder.try_init(),
        other => anyhow::bail!("Unsupported log format: {}. Use 'text' or 'json'", other),
    }
    .map_err(|e| anyhow::anyhow!("Logging init failed: {}", e))
}
