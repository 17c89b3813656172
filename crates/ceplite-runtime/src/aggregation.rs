//! Grouped running aggregates over a window.
//!
//! The aggregator never rescans the window: each insert adds its
//! contribution to the group accumulator and each eviction retracts it.
//!
//! | Function | Accumulator | Output |
//! |----------|-------------|--------|
//! | [`AggregateFunc::Count`] | counter | `Int` |
//! | [`AggregateFunc::Sum`] | running sum | `Float` |
//! | [`AggregateFunc::Avg`] | running sum + counter | `Float` |
//!
//! A group whose last event is evicted is dropped and reported as removed;
//! no value is computed for it, so an empty group never yields an average.

use ceplite_core::Value;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::event::{Event, Fields, SharedEvent};

/// Grouping key: the values of the `group_by` fields, in declaration order.
pub type GroupKey = SmallVec<[Value; 2]>;

/// Retractable aggregate function
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateFunc {
    Count,
    Sum(String),
    Avg(String),
}

impl AggregateFunc {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateFunc::Count => "count",
            AggregateFunc::Sum(_) => "sum",
            AggregateFunc::Avg(_) => "avg",
        }
    }

    pub(crate) fn default_output(&self) -> &'static str {
        self.name()
    }

    /// Field the function reads, if any.
    pub fn field(&self) -> Option<&str> {
        match self {
            AggregateFunc::Count => None,
            AggregateFunc::Sum(f) | AggregateFunc::Avg(f) => Some(f),
        }
    }
}

/// Running state of one group
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    count: u64,
    sum: f64,
}

impl Accumulator {
    fn add(&mut self, x: f64) {
        self.count += 1;
        self.sum += x;
    }

    fn retract(&mut self, x: f64) {
        self.count = self.count.saturating_sub(1);
        self.sum -= x;
        if self.count == 0 {
            self.sum = 0.0;
        }
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    fn value(&self, func: &AggregateFunc) -> Option<Value> {
        match func {
            AggregateFunc::Count => Some(Value::Int(self.count as i64)),
            AggregateFunc::Sum(_) => Some(Value::Float(self.sum)),
            AggregateFunc::Avg(_) if self.count == 0 => None,
            AggregateFunc::Avg(_) => Some(Value::Float(self.sum / self.count as f64)),
        }
    }
}

/// Rows produced by one insert/evict step
#[derive(Debug, Default, PartialEq)]
pub struct AggregateChange {
    /// Current value of every group that still has live events
    pub updated: Vec<Fields>,
    /// Grouping fields of every group that just became empty
    pub removed: Vec<Fields>,
}

impl AggregateChange {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.removed.is_empty()
    }
}

#[derive(Debug)]
pub struct GroupedAggregator {
    group_by: Vec<String>,
    func: AggregateFunc,
    output: String,
    groups: FxHashMap<GroupKey, Accumulator>,
}

impl GroupedAggregator {
    pub fn new(group_by: Vec<String>, func: AggregateFunc, output: impl Into<String>) -> Self {
        Self {
            group_by,
            func,
            output: output.into(),
            groups: FxHashMap::default(),
        }
    }

    fn key_of(&self, event: &Event) -> Option<GroupKey> {
        self.group_by.iter().map(|f| event.get(f).cloned()).collect()
    }

    fn contribution(&self, event: &Event) -> f64 {
        self.func
            .field()
            .and_then(|f| event.get_float(f))
            .unwrap_or(0.0)
    }

    /// Fold a window step into the accumulators and report affected groups.
    ///
    /// Inserted events are added before evicted ones are retracted, so an
    /// event that is evicted by its own insert nets out to nothing. Groups
    /// are reported in the order they were first touched, evictions first.
    /// A group created and emptied within the same step is never reported.
    pub fn apply(&mut self, inserted: &[SharedEvent], evicted: &[SharedEvent]) -> AggregateChange {
        let mut touched: Vec<(GroupKey, bool)> = Vec::new();
        for event in evicted.iter().chain(inserted) {
            if let Some(key) = self.key_of(event) {
                if !touched.iter().any(|(k, _)| *k == key) {
                    let existed = self.groups.contains_key(&key);
                    touched.push((key, existed));
                }
            }
        }

        for event in inserted {
            if let Some(key) = self.key_of(event) {
                let x = self.contribution(event);
                self.groups.entry(key).or_default().add(x);
            }
        }
        for event in evicted {
            if let Some(key) = self.key_of(event) {
                let x = self.contribution(event);
                if let Some(acc) = self.groups.get_mut(&key) {
                    acc.retract(x);
                }
            }
        }

        let mut change = AggregateChange::default();
        for (key, existed) in touched {
            let value = match self.groups.get(&key) {
                Some(acc) if acc.count > 0 => acc.value(&self.func),
                _ => None,
            };
            match value {
                Some(v) => {
                    let mut row = self.key_fields(&key);
                    row.insert(self.output.clone(), v);
                    change.updated.push(row);
                }
                None => {
                    self.groups.remove(&key);
                    if existed {
                        change.removed.push(self.key_fields(&key));
                    }
                }
            }
        }
        change
    }

    fn key_fields(&self, key: &GroupKey) -> Fields {
        self.group_by
            .iter()
            .cloned()
            .zip(key.iter().cloned())
            .collect()
    }

    pub fn group(&self, key: &[Value]) -> Option<&Accumulator> {
        self.groups.get(key)
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    pub fn clear(&mut self) {
        self.groups.clear();
    }
}
