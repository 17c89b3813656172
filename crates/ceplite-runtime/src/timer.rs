//! Timer facility for pattern timeouts
//!
//! Deadlines are scheduled on a private single-worker tokio runtime, so
//! timeouts fire even when no further events arrive. The runtime is built on
//! first use; engines that never arm a wall-clock deadline never start it.
//! Callbacks run on tokio's blocking pool because they take query locks.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, error};

/// Delay added to every deadline so the callback observes `now > deadline`.
const DEADLINE_SLACK: Duration = Duration::from_millis(1);

#[derive(Default)]
enum State {
    #[default]
    Idle,
    Running(Runtime),
    Stopped,
}

/// Schedules one-shot callbacks at wall-clock deadlines
#[derive(Default)]
pub(crate) struct TimerService {
    state: Mutex<State>,
}

impl TimerService {
    pub fn new() -> Self {
        Self::default()
    }

    fn build_runtime() -> std::io::Result<Runtime> {
        Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(4)
            .thread_name("ceplite-timer")
            .enable_time()
            .build()
    }

    /// Run `callback` once `at` has passed. Returns `false` if the service
    /// is stopped or its runtime could not be started.
    pub fn schedule<F>(&self, at: DateTime<Utc>, callback: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.state.lock();
        if matches!(*state, State::Idle) {
            match Self::build_runtime() {
                Ok(rt) => {
                    debug!("Timer runtime started");
                    *state = State::Running(rt);
                }
                Err(e) => {
                    error!("Failed to start timer runtime: {}", e);
                    return false;
                }
            }
        }
        let State::Running(rt) = &*state else {
            return false;
        };

        let delay = (at - Utc::now()).to_std().unwrap_or(Duration::ZERO) + DEADLINE_SLACK;
        rt.spawn(async move {
            tokio::time::sleep(delay).await;
            if let Err(e) = tokio::task::spawn_blocking(callback).await {
                error!("Timer callback failed: {}", e);
            }
        });
        true
    }

    /// Cancel every outstanding timer. Later calls to `schedule` are ignored.
    pub fn stop(&self) {
        let previous = std::mem::replace(&mut *self.state.lock(), State::Stopped);
        if let State::Running(rt) = previous {
            debug!("Stopping timer runtime");
            rt.shutdown_background();
        }
    }
}

impl Drop for TimerService {
    fn drop(&mut self) {
        self.stop();
    }
}
