//! Configuration file support for ceplite
//!
//! Supports both YAML and TOML configuration files.
//!
//! # Example YAML configuration:
//! ```yaml
//! # Engine settings
//! engine:
//!   timer_mode: wall_clock
//!   shutdown_timeout_ms: 5000
//!   max_pending_per_query: 100000
//!
//! # Logging settings
//! logging:
//!   level: info
//!   format: text
//!
//! # Demo producers
//! simulation:
//!   immediate: false
//!   max_delay_ms: 200
//!   records: 20
//!   tickers: [apple, cisco, ibm]
//!   seed: 42
//! ```

use ceplite_runtime::{EngineConfig, TimerMode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Engine configuration
    pub engine: EngineConfig,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Demo producer configuration
    pub simulation: SimulationConfig,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Demo producer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Run in immediate mode (no pacing delays)
    pub immediate: bool,

    /// Upper bound of the random delay between two records of one producer
    pub max_delay_ms: u64,

    /// Records emitted per producer
    pub records: usize,

    /// One producer thread per ticker in the finance demo
    pub tickers: Vec<String>,

    /// RNG seed; a random one is drawn when unset
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            immediate: false,
            max_delay_ms: 200,
            records: 20,
            tickers: vec!["apple".into(), "cisco".into(), "ibm".into()],
            seed: None,
        }
    }
}

impl SimulationConfig {
    pub fn max_delay(&self) -> Duration {
        if self.immediate {
            Duration::ZERO
        } else {
            Duration::from_millis(self.max_delay_ms)
        }
    }
}

impl Config {
    /// Load configuration from a file (YAML or TOML, auto-detected by extension)
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e.to_string()))?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("")
            .to_lowercase();

        match extension.as_str() {
            "yaml" | "yml" => Self::from_yaml(&content),
            "toml" => Self::from_toml(&content),
            _ => {
                // Try YAML first, then TOML
                Self::from_yaml(&content).or_else(|_| Self::from_toml(&content))
            }
        }
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Parse configuration from TOML string
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Create an example configuration
    pub fn example() -> Self {
        Self {
            engine: EngineConfig {
                timer_mode: TimerMode::WallClock,
                shutdown_timeout_ms: 5_000,
                max_pending_per_query: 100_000,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "text".to_string(),
            },
            simulation: SimulationConfig {
                seed: Some(42),
                ..Default::default()
            },
        }
    }

    /// Generate example YAML configuration
    pub fn example_yaml() -> String {
        serde_yaml::to_string(&Self::example()).unwrap_or_default()
    }

    /// Generate example TOML configuration
    pub fn example_toml() -> String {
        toml::to_string_pretty(&Self::example()).unwrap_or_default()
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(PathBuf, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.engine.timer_mode, TimerMode::WallClock);
        assert_eq!(config.simulation.tickers.len(), 3);
    }

    #[test]
    fn test_yaml_config() {
        let yaml = r#"
engine:
  timer_mode: event_time
logging:
  level: debug
  format: json
simulation:
  immediate: true
  records: 5
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.engine.timer_mode, TimerMode::EventTime);
        assert_eq!(config.engine.shutdown_timeout_ms, 5_000);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.simulation.records, 5);
        assert_eq!(config.simulation.max_delay(), Duration::ZERO);
    }

    #[test]
    fn test_toml_config() {
        let toml = r#"
[engine]
max_pending_per_query = 10

[simulation]
tickers = ["apple"]
seed = 7
"#;
        let config = Config::from_toml(toml).unwrap();
        assert_eq!(config.engine.max_pending_per_query, 10);
        assert_eq!(config.simulation.tickers, vec!["apple"]);
        assert_eq!(config.simulation.seed, Some(7));
        assert_eq!(config.simulation.max_delay(), Duration::from_millis(200));
    }

    #[test]
    fn test_example_roundtrips() {
        assert_eq!(Config::from_yaml(&Config::example_yaml()).unwrap(), Config::example());
        assert_eq!(Config::from_toml(&Config::example_toml()).unwrap(), Config::example());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            Config::from_yaml("engine: [unclosed"),
            Err(ConfigError::ParseError(_))
        ));
    }
}
