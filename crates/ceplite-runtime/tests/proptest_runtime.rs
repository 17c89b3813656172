//! Property-based tests for the ceplite runtime.
//!
//! Covers: window retention invariants for both policies, and grouped
//! counts staying consistent with the live window under arbitrary
//! out-of-order input and watermark advances.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use ceplite_core::{EventSchema, FieldType, Value};
use ceplite_runtime::aggregation::AggregateFunc;
use ceplite_runtime::event::{fields, Event};
use ceplite_runtime::query::AggregateQuery;
use ceplite_runtime::window::WindowStore;
use ceplite_runtime::{Engine, EngineConfig, WindowSpec};
use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use parking_lot::Mutex;
use proptest::prelude::*;

fn base() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2016, 1, 4, 0, 0, 0).unwrap()
}

fn event_at(offset_ms: i64, seq: u64) -> Arc<Event> {
    Arc::new(Event::from_fields(
        "Tick",
        base() + TimeDelta::milliseconds(offset_ms),
        seq,
        fields([("n", Value::Int(seq as i64))]),
    ))
}

proptest! {
    /// A length window always holds the most recent `n` events in arrival order.
    #[test]
    fn length_window_keeps_latest(n in 1usize..8, count in 0usize..40) {
        let mut store = WindowStore::new(WindowSpec::Length(n));
        let mut evicted = 0;
        for i in 0..count {
            evicted += store.insert(event_at(0, i as u64)).len();
        }
        prop_assert_eq!(store.len(), count.min(n));
        prop_assert_eq!(evicted + store.len(), count);
        let seqs: Vec<u64> = store.iter().map(|e| e.seq).collect();
        let expected: Vec<u64> = (count.saturating_sub(n)..count).map(|i| i as u64).collect();
        prop_assert_eq!(seqs, expected);
    }

    /// A time window holds exactly the events within its span of the newest
    /// timestamp seen, regardless of arrival order.
    #[test]
    fn time_window_retains_recent_span(
        span_ms in 1u64..5_000,
        offsets in prop::collection::vec(0i64..20_000, 0..40),
    ) {
        let mut store = WindowStore::new(WindowSpec::Time(Duration::from_millis(span_ms)));
        let mut evicted = 0;
        for (i, offset) in offsets.iter().enumerate() {
            evicted += store.insert(event_at(*offset, i as u64)).len();
        }
        prop_assert_eq!(evicted + store.len(), offsets.len());

        if let Some(newest) = offsets.iter().max() {
            let cutoff = newest - span_ms as i64;
            let expected: Vec<u64> = offsets
                .iter()
                .enumerate()
                .filter(|(_, o)| **o >= cutoff)
                .map(|(i, _)| i as u64)
                .collect();
            let seqs: Vec<u64> = store.iter().map(|e| e.seq).collect();
            prop_assert_eq!(seqs, expected);
        } else {
            prop_assert!(store.is_empty());
        }
    }

    /// Reported per-group counts always equal the live window contents.
    #[test]
    fn grouped_counts_match_window(
        inputs in prop::collection::vec((0usize..3, 0i64..10_000, any::<bool>()), 1..40),
    ) {
        let engine = Engine::new(EngineConfig::event_time());
        engine
            .register_type("Tick", EventSchema::new().with_field("key", FieldType::Str))
            .unwrap();
        let q = engine
            .register_query(
                AggregateQuery::new(
                    "per_key",
                    "Tick",
                    WindowSpec::Time(Duration::from_secs(2)),
                    AggregateFunc::Count,
                )
                .group_by("key"),
            )
            .unwrap();

        let table: Arc<Mutex<BTreeMap<String, i64>>> = Arc::default();
        let sink = Arc::clone(&table);
        engine
            .subscribe_fn(q, move |update| {
                let mut table = sink.lock();
                for row in &update.expired_rows {
                    table.remove(row.get_str("key").unwrap_or_default());
                }
                for row in &update.new_rows {
                    let key = row.get_str("key").unwrap_or_default().to_string();
                    table.insert(key, row.get_int("count").unwrap_or_default());
                }
                Ok(())
            })
            .unwrap();

        let keys = ["apple", "cisco", "ibm"];
        for (key, offset, watermark) in inputs {
            let ts = base() + TimeDelta::milliseconds(offset);
            if watermark {
                engine.advance_watermark(ts).unwrap();
            } else {
                engine
                    .ingest("Tick", fields([("key", Value::from(keys[key]))]), ts)
                    .unwrap();
            }

            let mut live: BTreeMap<String, i64> = BTreeMap::new();
            for e in engine.snapshot(q).unwrap() {
                *live.entry(e.get_str("key").unwrap_or_default().to_string()).or_default() += 1;
            }
            prop_assert_eq!(&*table.lock(), &live);
        }
    }
}
