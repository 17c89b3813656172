//! Engine configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Clock that drives pattern deadlines
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimerMode {
    /// Deadlines are processing time: `Utc::now() + within` when stage 1
    /// fires, and a timer task clears the partial match once it passes.
    #[default]
    WallClock,
    /// Deadlines are event time: stage-1 timestamp `+ within`. Stale state
    /// is cleared by later events and by [`crate::Engine::advance_watermark`].
    EventTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub timer_mode: TimerMode,
    /// How long `shutdown` waits for each query's in-flight evaluation
    pub shutdown_timeout_ms: u64,
    /// Upper bound on pending partial matches per pattern query
    pub max_pending_per_query: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            timer_mode: TimerMode::WallClock,
            shutdown_timeout_ms: 5_000,
            max_pending_per_query: 100_000,
        }
    }
}

impl EngineConfig {
    pub fn event_time() -> Self {
        Self {
            timer_mode: TimerMode::EventTime,
            ..Self::default()
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}
