//! Window store: the live set of events retained by one query
//!
//! A window is either time-based (events within `duration` of the latest
//! event timestamp seen) or length-based (the most recent `n` events).
//! Eviction runs synchronously inside every insert, so a store at rest always
//! satisfies its policy.

use crate::event::SharedEvent;
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

/// Retention policy of a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowSpec {
    /// Keep events whose timestamp is within the duration of the latest one
    Time(Duration),
    /// Keep the most recent `n` events
    Length(usize),
}

impl WindowSpec {
    pub fn is_time(&self) -> bool {
        matches!(self, WindowSpec::Time(_))
    }
}

/// Ordered buffer of live events for a single query.
#[derive(Debug)]
pub struct WindowStore {
    spec: WindowSpec,
    span: Option<TimeDelta>,
    events: VecDeque<SharedEvent>,
    watermark: Option<DateTime<Utc>>,
}

impl WindowStore {
    pub fn new(spec: WindowSpec) -> Self {
        let span = match spec {
            WindowSpec::Time(d) => Some(TimeDelta::from_std(d).unwrap_or(TimeDelta::MAX)),
            WindowSpec::Length(_) => None,
        };
        let events = match spec {
            WindowSpec::Length(n) => VecDeque::with_capacity(n.min(1024)),
            WindowSpec::Time(_) => VecDeque::new(),
        };
        Self {
            spec,
            span,
            events,
            watermark: None,
        }
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    /// Append an event and evict whatever the policy no longer admits.
    ///
    /// Returns the evicted events in arrival order. An event that is already
    /// too old for a time window is evicted by its own insert.
    pub fn insert(&mut self, event: SharedEvent) -> Vec<SharedEvent> {
        let ts = event.timestamp;
        self.events.push_back(event);
        let now = self.watermark.map_or(ts, |wm| wm.max(ts));
        self.watermark = Some(now);
        self.evict(now)
    }

    /// Enforce the retention policy relative to `now`.
    ///
    /// For time windows every event older than `now - duration` is removed,
    /// including stragglers that arrived out of timestamp order. Length
    /// windows ignore `now`.
    pub fn evict(&mut self, now: DateTime<Utc>) -> Vec<SharedEvent> {
        match self.spec {
            WindowSpec::Length(n) => {
                let overflow = self.events.len().saturating_sub(n);
                self.events.drain(..overflow).collect()
            }
            WindowSpec::Time(_) => {
                let Some(cutoff) = self.span.and_then(|span| now.checked_sub_signed(span)) else {
                    return Vec::new();
                };
                if self.events.iter().all(|e| e.timestamp >= cutoff) {
                    return Vec::new();
                }
                let mut evicted = Vec::new();
                self.events.retain(|e| {
                    if e.timestamp < cutoff {
                        evicted.push(Arc::clone(e));
                        false
                    } else {
                        true
                    }
                });
                evicted
            }
        }
    }

    /// Move the window's notion of time forward without inserting.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> Vec<SharedEvent> {
        if !self.spec.is_time() {
            return Vec::new();
        }
        let now = self.watermark.map_or(now, |wm| wm.max(now));
        self.watermark = Some(now);
        self.evict(now)
    }

    /// Current contents in arrival order.
    pub fn snapshot(&self) -> Vec<SharedEvent> {
        self.events.iter().map(Arc::clone).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SharedEvent> {
        self.events.iter()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn watermark(&self) -> Option<DateTime<Utc>> {
        self.watermark
    }

    /// Drop every retained event.
    pub fn clear(&mut self) -> Vec<SharedEvent> {
        self.events.drain(..).collect()
    }
}
