//! Per-query evaluation
//!
//! [`QueryState`] owns everything a query mutates. Each step returns an
//! [`Output`] that the engine dispatches after releasing the state borrow.

use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::trace;

use super::listener::ResultRow;
use crate::aggregation::GroupedAggregator;
use crate::config::TimerMode;
use crate::event::{Event, SharedEvent};
use crate::join::JoinEngine;
use crate::pattern::PatternMatcher;
use crate::query::Predicate;
use crate::window::WindowStore;

#[derive(Debug)]
pub(crate) enum QueryState {
    Window {
        event_type: String,
        filter: Option<Predicate>,
        window: WindowStore,
    },
    Aggregate {
        event_type: String,
        filter: Option<Predicate>,
        window: WindowStore,
        aggregator: GroupedAggregator,
    },
    Pattern(PatternMatcher),
    Join(JoinEngine),
}

/// Result of one evaluation step
#[derive(Debug, Default)]
pub(crate) struct Output {
    pub new_rows: Vec<ResultRow>,
    pub expired_rows: Vec<ResultRow>,
    /// Wall-clock deadline armed by a pattern, for the timer facility
    pub armed: Option<DateTime<Utc>>,
    /// Partial matches discarded because their deadline passed
    pub timeouts: usize,
}

impl Output {
    pub fn has_rows(&self) -> bool {
        !self.new_rows.is_empty() || !self.expired_rows.is_empty()
    }
}

fn accepts(event_type: &str, filter: Option<&Predicate>, event: &Event) -> bool {
    *event.event_type == *event_type && filter.map_or(true, |p| p.matches(event))
}

fn event_row(event: &SharedEvent) -> ResultRow {
    ResultRow::new(event.data.clone(), event.timestamp)
}

impl QueryState {
    pub fn kind(&self) -> &'static str {
        match self {
            QueryState::Window { .. } => "window",
            QueryState::Aggregate { .. } => "aggregate",
            QueryState::Pattern(_) => "pattern",
            QueryState::Join(_) => "join",
        }
    }

    /// Evaluate one routed event.
    pub fn process(&mut self, event: &SharedEvent, mode: TimerMode) -> Output {
        let mut out = Output::default();
        match self {
            QueryState::Window {
                event_type,
                filter,
                window,
            } => {
                if !accepts(event_type, filter.as_ref(), event) {
                    return out;
                }
                let evicted = window.insert(Arc::clone(event));
                let self_evicted = evicted.iter().any(|e| Arc::ptr_eq(e, event));
                if !self_evicted {
                    out.new_rows.push(event_row(event));
                }
                out.expired_rows = evicted
                    .iter()
                    .filter(|e| !Arc::ptr_eq(e, event))
                    .map(event_row)
                    .collect();
            }
            QueryState::Aggregate {
                event_type,
                filter,
                window,
                aggregator,
            } => {
                if !accepts(event_type, filter.as_ref(), event) {
                    return out;
                }
                let evicted = window.insert(Arc::clone(event));
                let change = aggregator.apply(std::slice::from_ref(event), &evicted);
                out.new_rows = change
                    .updated
                    .into_iter()
                    .map(|f| ResultRow::new(f, event.timestamp))
                    .collect();
                out.expired_rows = change
                    .removed
                    .into_iter()
                    .map(|f| ResultRow::new(f, event.timestamp))
                    .collect();
            }
            QueryState::Pattern(matcher) => {
                let now = match mode {
                    TimerMode::WallClock => Utc::now(),
                    TimerMode::EventTime => {
                        out.timeouts = matcher.expire(event.timestamp);
                        event.timestamp
                    }
                };
                let step = matcher.on_event(event, now);
                if let Some(row) = step.matched {
                    out.new_rows.push(ResultRow::new(row, event.timestamp));
                }
                if mode == TimerMode::WallClock {
                    out.armed = step.armed;
                }
            }
            QueryState::Join(join) => {
                out.new_rows = join
                    .on_event(event)
                    .into_iter()
                    .map(|f| ResultRow::new(f, event.timestamp))
                    .collect();
            }
        }
        out
    }

    /// Move time forward to `now` without an event.
    pub fn advance_to(&mut self, now: DateTime<Utc>, mode: TimerMode) -> Output {
        let mut out = Output::default();
        match self {
            QueryState::Window { window, .. } => {
                out.expired_rows = window.advance_to(now).iter().map(event_row).collect();
            }
            QueryState::Aggregate {
                window, aggregator, ..
            } => {
                let evicted = window.advance_to(now);
                if !evicted.is_empty() {
                    let change = aggregator.apply(&[], &evicted);
                    out.new_rows = change
                        .updated
                        .into_iter()
                        .map(|f| ResultRow::new(f, now))
                        .collect();
                    out.expired_rows = change
                        .removed
                        .into_iter()
                        .map(|f| ResultRow::new(f, now))
                        .collect();
                }
            }
            QueryState::Pattern(matcher) => {
                if mode == TimerMode::EventTime {
                    out.timeouts = matcher.expire(now);
                }
            }
            QueryState::Join(join) => {
                let evicted = join.advance_to(now);
                trace!("Join evicted {} events at watermark {}", evicted, now);
            }
        }
        out
    }

    /// Discard pattern state whose deadline is before `now`.
    pub fn expire_patterns(&mut self, now: DateTime<Utc>) -> usize {
        match self {
            QueryState::Pattern(matcher) => matcher.expire(now),
            _ => 0,
        }
    }

    /// Drop all pending pattern state without emitting.
    pub fn clear_pending(&mut self) -> usize {
        match self {
            QueryState::Pattern(matcher) => matcher.clear(),
            _ => 0,
        }
    }

    pub fn pending_len(&self) -> usize {
        match self {
            QueryState::Pattern(matcher) => matcher.pending_len(),
            _ => 0,
        }
    }

    /// Live window contents. Joins report the left side followed by the right.
    pub fn snapshot(&self) -> Vec<SharedEvent> {
        match self {
            QueryState::Window { window, .. } | QueryState::Aggregate { window, .. } => {
                window.snapshot()
            }
            QueryState::Join(join) => join.snapshot(),
            QueryState::Pattern(_) => Vec::new(),
        }
    }
}
