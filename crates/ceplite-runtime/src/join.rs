//! Two-stream windowed join
//!
//! Each side keeps its own [`WindowStore`], but both time windows follow the
//! latest timestamp seen by either side. When an event lands on one side,
//! that side's window is updated first and then the other side's live
//! events are scanned for partners. Every partner found yields one row;
//! identical rows are never deduplicated.

use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{trace, warn};

use crate::event::{Event, Fields, SharedEvent};
use crate::query::{JoinInput, JoinQuery, Predicate, Projection};
use crate::window::WindowStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Left,
    Right,
}

impl Side {
    fn opposite(self) -> Side {
        match self {
            Side::Left => Side::Right,
            Side::Right => Side::Left,
        }
    }
}

#[derive(Debug)]
struct JoinSide {
    alias: String,
    event_type: String,
    filter: Option<Predicate>,
    window: WindowStore,
}

impl JoinSide {
    fn new(input: &JoinInput) -> Self {
        Self {
            alias: input.alias.clone(),
            event_type: input.event_type.clone(),
            filter: input.filter.clone(),
            window: WindowStore::new(input.window),
        }
    }

    fn accepts(&self, event: &Event) -> bool {
        *event.event_type == *self.event_type
            && self.filter.as_ref().map_or(true, |p| p.matches(event))
    }
}

#[derive(Debug)]
pub struct JoinEngine {
    left: JoinSide,
    right: JoinSide,
    on: Option<(String, String)>,
    projection: Option<Projection>,
}

impl JoinEngine {
    pub fn new(query: &JoinQuery) -> Self {
        Self {
            left: JoinSide::new(&query.left),
            right: JoinSide::new(&query.right),
            on: query.on.clone(),
            projection: query.projection.clone(),
        }
    }

    fn side(&self, side: Side) -> &JoinSide {
        match side {
            Side::Left => &self.left,
            Side::Right => &self.right,
        }
    }

    /// Route an event to whichever sides accept it (left first) and return
    /// the joined rows it triggers.
    pub fn on_event(&mut self, event: &SharedEvent) -> Vec<Fields> {
        let mut rows = Vec::new();
        for side in [Side::Left, Side::Right] {
            if self.side(side).accepts(event) {
                rows.extend(self.insert(side, event));
            }
        }
        rows
    }

    fn insert(&mut self, side: Side, event: &SharedEvent) -> Vec<Fields> {
        let (this, other) = match side {
            Side::Left => (&mut self.left, &mut self.right),
            Side::Right => (&mut self.right, &mut self.left),
        };
        // Both sides share the query's latest processed time.
        let now = [this.window.watermark(), other.window.watermark()]
            .into_iter()
            .flatten()
            .fold(event.timestamp, |a, b| a.max(b));
        this.window.advance_to(now);
        other.window.advance_to(now);

        let evicted = this.window.insert(Arc::clone(event));
        if evicted.iter().any(|e| Arc::ptr_eq(e, event)) {
            trace!("Join event for '{}' fell outside its window", this.alias);
            return Vec::new();
        }

        let mut rows = Vec::new();
        for candidate in self.side(side.opposite()).window.iter() {
            if Arc::ptr_eq(candidate, event) {
                continue;
            }
            let (l, r) = match side {
                Side::Left => (event.as_ref(), candidate.as_ref()),
                Side::Right => (candidate.as_ref(), event.as_ref()),
            };
            if !self.keys_match(l, r) {
                continue;
            }
            if let Some(row) = self.build_row(l, r) {
                rows.push(row);
            }
        }
        rows
    }

    fn keys_match(&self, left: &Event, right: &Event) -> bool {
        let Some((lf, rf)) = &self.on else {
            return true;
        };
        match (left.get(lf), right.get(rf)) {
            (Some(a), Some(b)) => a.compare(b) == Some(Ordering::Equal),
            _ => false,
        }
    }

    fn build_row(&self, left: &Event, right: &Event) -> Option<Fields> {
        let Some(projection) = &self.projection else {
            let mut row = Fields::default();
            for (alias, event) in [(&self.left.alias, left), (&self.right.alias, right)] {
                for (name, value) in &event.data {
                    row.insert(format!("{}.{}", alias, name), value.clone());
                }
            }
            return Some(row);
        };

        let bindings = [
            (self.left.alias.as_str(), left),
            (self.right.alias.as_str(), right),
        ];
        let mut row = Fields::default();
        for (name, expr) in projection {
            match expr.eval(&bindings) {
                Some(value) => {
                    row.insert(name.clone(), value);
                }
                None => {
                    warn!("Join projection '{}' could not be evaluated, row dropped", name);
                    return None;
                }
            }
        }
        Some(row)
    }

    /// Advance both time windows to `now`. Joins emit nothing on eviction.
    pub fn advance_to(&mut self, now: DateTime<Utc>) -> usize {
        self.left.window.advance_to(now).len() + self.right.window.advance_to(now).len()
    }

    pub fn window_len(&self, side: Side) -> usize {
        self.side(side).window.len()
    }

    /// Live events of both sides, left first.
    pub fn snapshot(&self) -> Vec<SharedEvent> {
        let mut events = self.left.window.snapshot();
        events.extend(self.right.window.snapshot());
        events
    }

    pub fn clear(&mut self) {
        self.left.window.clear();
        self.right.window.clear();
    }
}
