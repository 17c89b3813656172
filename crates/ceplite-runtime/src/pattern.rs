//! Two-stage temporal pattern matcher
//!
//! Implements `every a=First -> b=Second(b.key = a.key)` bounded by a
//! deadline. State is kept per correlation-key value:
//!
//! ```text
//!            stage 1 (key k)                 stage 2 (key k, now <= deadline)
//!   Idle ─────────────────────────▶ Pending ─────────────────────────────────▶ emit, Idle
//!                                    │  ▲
//!                   deadline passed  │  │ stage 1 again (last one wins)
//!                                    ▼  │
//!                                   Idle
//! ```
//!
//! The matcher itself has no clock. Callers pass `now` explicitly, so the
//! same code serves wall-clock deadlines (timer tasks call [`PatternMatcher::expire`])
//! and event-time deadlines (watermarks call it).

use chrono::{DateTime, TimeDelta, Utc};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::{trace, warn};

use ceplite_core::Value;

use crate::event::{Event, Fields, SharedEvent};
use crate::query::{PatternQuery, PatternStage, Projection};

/// A stage-1 event waiting for its stage-2 partner
#[derive(Debug, Clone)]
struct Pending {
    first: SharedEvent,
    deadline: DateTime<Utc>,
}

/// Outcome of feeding one event to the matcher
#[derive(Debug, Default)]
pub struct PatternStep {
    /// Projected row, if the event completed a match
    pub matched: Option<Fields>,
    /// Deadline of the partial match armed by the event, if any
    pub armed: Option<DateTime<Utc>>,
}

/// Hash key for a correlation value. Integral floats map onto `Int` so an
/// `Int` field can correlate with a `Float` one, as `Value::compare` allows.
fn correlation_key(value: &Value) -> Value {
    match value {
        Value::Float(f) if f.fract() == 0.0 && *f >= i64::MIN as f64 && *f < i64::MAX as f64 => {
            Value::Int(*f as i64)
        }
        other => other.clone(),
    }
}

#[derive(Debug)]
pub struct PatternMatcher {
    first: PatternStage,
    second: PatternStage,
    first_key: String,
    second_key: String,
    within: TimeDelta,
    projection: Projection,
    pending: FxHashMap<Value, Pending>,
    max_pending: usize,
}

impl PatternMatcher {
    pub fn new(query: &PatternQuery) -> Self {
        Self {
            first: query.first.clone(),
            second: query.second.clone(),
            first_key: query.correlation.0.clone(),
            second_key: query.correlation.1.clone(),
            within: TimeDelta::from_std(query.within).unwrap_or(TimeDelta::MAX),
            projection: query.projection.clone(),
            pending: FxHashMap::default(),
            max_pending: usize::MAX,
        }
    }

    /// Cap the number of keys held pending at once.
    pub fn with_max_pending(mut self, max: usize) -> Self {
        self.max_pending = max.max(1);
        self
    }

    fn stage_matches(stage: &PatternStage, event: &Event) -> bool {
        *event.event_type == *stage.event_type
            && stage.filter.as_ref().map_or(true, |p| p.matches(event))
    }

    /// Feed one event at time `now`.
    ///
    /// Stage 2 is tried before stage 1, so an event that satisfies both
    /// stages first completes the match pending for its key and then arms a
    /// new one. It never pairs with itself.
    pub fn on_event(&mut self, event: &SharedEvent, now: DateTime<Utc>) -> PatternStep {
        let mut step = PatternStep::default();

        if Self::stage_matches(&self.second, event) {
            if let Some(key) = event.get(&self.second_key).map(correlation_key) {
                if let Some(pending) = self.pending.remove(&key) {
                    if now <= pending.deadline {
                        step.matched = self.project(&pending.first, event);
                    } else {
                        trace!("Pattern partial match for {} expired before stage 2", key);
                    }
                }
            }
        }

        if Self::stage_matches(&self.first, event) {
            if let Some(key) = event.get(&self.first_key).map(correlation_key) {
                let deadline = now.checked_add_signed(self.within).unwrap_or(DateTime::<Utc>::MAX_UTC);
                if !self.pending.contains_key(&key) && self.pending.len() >= self.max_pending {
                    self.drop_oldest();
                }
                self.pending.insert(
                    key,
                    Pending {
                        first: Arc::clone(event),
                        deadline,
                    },
                );
                step.armed = Some(deadline);
            }
        }

        step
    }

    fn drop_oldest(&mut self) {
        let oldest = self
            .pending
            .iter()
            .min_by_key(|(_, p)| p.deadline)
            .map(|(k, _)| k.clone());
        if let Some(key) = oldest {
            warn!(
                "Pattern pending limit {} reached, dropping partial match for {}",
                self.max_pending, key
            );
            self.pending.remove(&key);
        }
    }

    fn project(&self, first: &Event, second: &Event) -> Option<Fields> {
        let bindings = [
            (self.first.alias.as_str(), first),
            (self.second.alias.as_str(), second),
        ];
        let mut row = Fields::default();
        for (name, expr) in &self.projection {
            match expr.eval(&bindings) {
                Some(value) => {
                    row.insert(name.clone(), value);
                }
                None => {
                    warn!("Pattern projection '{}' could not be evaluated, match dropped", name);
                    return None;
                }
            }
        }
        Some(row)
    }

    /// Discard every partial match whose deadline is before `now`.
    /// Returns how many were discarded.
    pub fn expire(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.pending.len();
        self.pending.retain(|_, p| p.deadline >= now);
        before - self.pending.len()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_pending(&self, key: &Value) -> bool {
        self.pending.contains_key(&correlation_key(key))
    }

    pub fn next_deadline(&self) -> Option<DateTime<Utc>> {
        self.pending.values().map(|p| p.deadline).min()
    }

    /// Drop all partial matches without emitting. Returns how many there were.
    pub fn clear(&mut self) -> usize {
        let n = self.pending.len();
        self.pending.clear();
        n
    }
}
