//! End-to-end engine scenarios: wall-clock patterns, joins, chained queries,
//! concurrent producers and listener isolation.

use ceplite_core::{EventSchema, FieldType, Value};
use ceplite_runtime::aggregation::AggregateFunc;
use ceplite_runtime::event::fields;
use ceplite_runtime::query::{
    AggregateQuery, Expr, JoinInput, JoinQuery, PatternQuery, Predicate, WindowQuery,
};
use ceplite_runtime::{
    Engine, EngineConfig, Fields, IngestError, QueryHandle, QueryUpdate, RegistrationError,
    WindowSpec,
};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

fn engine() -> Engine {
    let engine = Engine::new(EngineConfig::default());
    engine
        .register_type(
            "Stock",
            EventSchema::new()
                .with_field("key", FieldType::Str)
                .with_field("closing", FieldType::Float),
        )
        .unwrap();
    engine
        .register_type(
            "Growth",
            EventSchema::new()
                .with_field("key", FieldType::Str)
                .with_field("growth", FieldType::Float),
        )
        .unwrap();
    engine
}

fn stock(key: &str, closing: f64) -> Fields {
    fields([("key", Value::from(key)), ("closing", Value::Float(closing))])
}

fn growth(key: &str, growth: f64) -> Fields {
    fields([("key", Value::from(key)), ("growth", Value::Float(growth))])
}

fn growth_query(engine: &Engine) -> QueryHandle {
    engine
        .register_query(
            PatternQuery::new("growth")
                .first("a", "Stock")
                .then("b", "Stock")
                .correlate("key", "key")
                .within(Duration::from_secs(1))
                .select("key", Expr::field("a", "key"))
                .select("growth", Expr::field("b", "closing").sub(Expr::field("a", "closing"))),
        )
        .unwrap()
}

fn diff_query(engine: &Engine) -> QueryHandle {
    engine
        .register_query(
            JoinQuery::new(
                "apple_vs_cisco",
                JoinInput::new("apple", "Growth", WindowSpec::Length(1))
                    .filter(Predicate::eq("key", "apple")),
                JoinInput::new("cisco", "Growth", WindowSpec::Length(1))
                    .filter(Predicate::eq("key", "cisco")),
            )
            .select("diff", Expr::field("cisco", "growth").sub(Expr::field("apple", "growth"))),
        )
        .unwrap()
}

fn collect(engine: &Engine, handle: QueryHandle) -> Arc<Mutex<Vec<QueryUpdate>>> {
    let updates = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&updates);
    engine
        .subscribe_fn(handle, move |u| {
            sink.lock().push(u.clone());
            Ok(())
        })
        .unwrap();
    updates
}

fn new_rows(updates: &Mutex<Vec<QueryUpdate>>) -> Vec<ceplite_runtime::ResultRow> {
    updates
        .lock()
        .iter()
        .flat_map(|u| u.new_rows.iter().cloned())
        .collect()
}

// =============================================================================
// Wall-clock patterns
// =============================================================================

#[test]
fn pattern_matches_within_wall_clock_deadline() {
    let engine = engine();
    let q = growth_query(&engine);
    let updates = collect(&engine, q);

    engine.ingest("Stock", stock("apple", 100.0), Utc::now()).unwrap();
    thread::sleep(Duration::from_millis(500));
    engine.ingest("Stock", stock("apple", 102.0), Utc::now()).unwrap();

    let rows = new_rows(&updates);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("key"), Some("apple"));
    assert_eq!(rows[0].get_float("growth"), Some(2.0));
}

#[test]
fn pattern_times_out_after_wall_clock_deadline() {
    let engine = engine();
    let q = growth_query(&engine);
    let updates = collect(&engine, q);

    engine.ingest("Stock", stock("apple", 100.0), Utc::now()).unwrap();
    assert_eq!(engine.pending_matches(q).unwrap(), 1);
    thread::sleep(Duration::from_millis(1500));
    assert_eq!(engine.pending_matches(q).unwrap(), 0);
    assert_eq!(engine.metrics().pattern_timeouts, 1);

    engine.ingest("Stock", stock("apple", 102.0), Utc::now()).unwrap();
    assert!(new_rows(&updates).is_empty());
    // The late event armed a fresh partial match instead
    assert_eq!(engine.pending_matches(q).unwrap(), 1);
}

#[test]
fn pattern_keys_do_not_cross() {
    let engine = engine();
    let q = growth_query(&engine);
    let updates = collect(&engine, q);

    engine.ingest("Stock", stock("apple", 100.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("cisco", 30.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("cisco", 31.0), Utc::now()).unwrap();

    let rows = new_rows(&updates);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_str("key"), Some("cisco"));
    assert_eq!(rows[0].get_float("growth"), Some(1.0));
    // apple still waits for its partner, and cisco's second close re-armed
    assert_eq!(engine.pending_matches(q).unwrap(), 2);
}

// =============================================================================
// Joins
// =============================================================================

#[test]
fn join_pairs_latest_apple_and_cisco() {
    let engine = engine();
    let q = diff_query(&engine);
    let updates = collect(&engine, q);

    engine.ingest("Growth", growth("apple", 1.0), Utc::now()).unwrap();
    assert!(new_rows(&updates).is_empty());

    engine.ingest("Growth", growth("cisco", 3.0), Utc::now()).unwrap();
    engine.ingest("Growth", growth("ibm", 9.0), Utc::now()).unwrap();
    engine.ingest("Growth", growth("apple", 4.0), Utc::now()).unwrap();

    let diffs: Vec<f64> = new_rows(&updates)
        .iter()
        .filter_map(|r| r.get_float("diff"))
        .collect();
    assert_eq!(diffs, vec![2.0, -1.0]);
    assert_eq!(engine.snapshot(q).unwrap().len(), 2);
}

#[test]
fn time_join_drops_partners_outside_shared_window() {
    let engine = engine();
    let q = engine
        .register_query(
            JoinQuery::new(
                "price_vs_growth",
                JoinInput::new("s", "Stock", WindowSpec::Time(Duration::from_secs(5))),
                JoinInput::new("g", "Growth", WindowSpec::Time(Duration::from_secs(5))),
            )
            .on("key", "key")
            .select("closing", Expr::field("s", "closing")),
        )
        .unwrap();
    let updates = collect(&engine, q);
    let t0 = Utc::now();
    let at = |secs: i64| t0 + chrono::TimeDelta::seconds(secs);

    // Stocks arrive steadily while growth jumps far ahead
    engine.ingest("Stock", stock("x", 1.0), at(0)).unwrap();
    engine.ingest("Growth", growth("x", 0.5), at(100)).unwrap();
    assert!(new_rows(&updates).is_empty());

    engine.ingest("Stock", stock("x", 2.0), at(98)).unwrap();
    engine.ingest("Stock", stock("x", 3.0), at(101)).unwrap();
    engine.ingest("Growth", growth("x", 0.7), at(104)).unwrap();

    let closings: Vec<f64> = new_rows(&updates)
        .iter()
        .filter_map(|r| r.get_float("closing"))
        .collect();
    assert_eq!(closings, vec![2.0, 3.0, 3.0]);
    // Live: stock at 101 plus both growth events
    assert_eq!(engine.snapshot(q).unwrap().len(), 3);
}

#[test]
fn chained_pattern_feeds_join() {
    let engine = engine();
    let pattern = growth_query(&engine);
    let join = diff_query(&engine);

    let feeder = engine.clone();
    engine
        .subscribe_fn(pattern, move |update| {
            for row in &update.new_rows {
                feeder.ingest("Growth", row.clone().into_fields(), row.timestamp)?;
            }
            Ok(())
        })
        .unwrap();
    let joined = collect(&engine, join);

    engine.ingest("Stock", stock("apple", 100.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("apple", 103.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("cisco", 20.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("cisco", 21.0), Utc::now()).unwrap();

    let rows = new_rows(&joined);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_float("diff"), Some(-2.0));
    assert_eq!(engine.metrics().events_ingested, 6);
    engine.shutdown();
}

// =============================================================================
// Windows and aggregation
// =============================================================================

#[test]
fn duplicate_events_each_occupy_the_window() {
    let engine = engine();
    let q = engine
        .register_query(WindowQuery::new("recent", "Stock", WindowSpec::Time(Duration::from_secs(60))))
        .unwrap();

    let now = Utc::now();
    for expected in 1..=3 {
        engine.ingest("Stock", stock("ibm", 150.0), now).unwrap();
        assert_eq!(engine.snapshot(q).unwrap().len(), expected);
    }
}

#[test]
fn filtered_window_ignores_other_keys() {
    let engine = engine();
    let q = engine
        .register_query(
            WindowQuery::new("cheap", "Stock", WindowSpec::Length(5))
                .filter(Predicate::lt("closing", 50.0)),
        )
        .unwrap();

    engine.ingest("Stock", stock("ibm", 150.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("cisco", 25.0), Utc::now()).unwrap();

    let live = engine.snapshot(q).unwrap();
    assert_eq!(live.len(), 1);
    assert_eq!(live[0].get_str("key"), Some("cisco"));
}

#[test]
fn sum_per_key_tracks_window() {
    let engine = engine();
    let q = engine
        .register_query(
            AggregateQuery::new(
                "total",
                "Stock",
                WindowSpec::Length(2),
                AggregateFunc::Sum("closing".into()),
            )
            .group_by("key"),
        )
        .unwrap();
    let updates = collect(&engine, q);

    engine.ingest("Stock", stock("a", 1.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("a", 2.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("b", 5.0), Utc::now()).unwrap();

    let updates = updates.lock();
    let last = updates.last().unwrap();
    let sums: Vec<(Option<&str>, Option<f64>)> = last
        .new_rows
        .iter()
        .map(|r| (r.get_str("key"), r.get_float("sum")))
        .collect();
    assert!(sums.contains(&(Some("b"), Some(5.0))));
    assert!(sums.contains(&(Some("a"), Some(2.0))));
}

// =============================================================================
// Registration
// =============================================================================

#[test]
fn query_on_unknown_type_is_rejected() {
    let engine = engine();
    let err = engine
        .register_query(WindowQuery::new("w", "Trade", WindowSpec::Length(1)))
        .unwrap_err();
    assert_eq!(err, RegistrationError::UnknownType("Trade".into()));
    assert_eq!(engine.query_count(), 0);
}

#[test]
fn conflicting_schema_is_rejected() {
    let engine = engine();
    let err = engine
        .register_type("Stock", EventSchema::new().with_field("key", FieldType::Int))
        .unwrap_err();
    assert!(matches!(err, RegistrationError::DuplicateType(_)));
}

// =============================================================================
// Concurrency and listeners
// =============================================================================

#[test]
fn concurrent_producers_lose_nothing() {
    let engine = engine();
    let window = engine
        .register_query(WindowQuery::new("all", "Stock", WindowSpec::Length(10_000)))
        .unwrap();
    let count = engine
        .register_query(AggregateQuery::new(
            "count",
            "Stock",
            WindowSpec::Length(10_000),
            AggregateFunc::Count,
        ))
        .unwrap();
    let calls = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&calls);
    engine
        .subscribe_fn(window, move |_| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
        .unwrap();
    let counts = collect(&engine, count);

    let producers: Vec<_> = ["a", "b", "c", "d"]
        .into_iter()
        .map(|key| {
            let engine = engine.clone();
            thread::spawn(move || {
                for i in 0..250 {
                    engine.ingest("Stock", stock(key, i as f64), Utc::now()).unwrap();
                }
            })
        })
        .collect();
    for p in producers {
        p.join().unwrap();
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1000);
    let live = engine.snapshot(window).unwrap();
    assert_eq!(live.len(), 1000);
    let mut seqs: Vec<u64> = live.iter().map(|e| e.seq).collect();
    seqs.sort_unstable();
    seqs.dedup();
    assert_eq!(seqs.len(), 1000);

    let last = counts.lock().last().cloned().unwrap();
    assert_eq!(last.new_rows[0].get_int("count"), Some(1000));
    assert_eq!(engine.metrics().events_ingested, 1000);
}

#[test]
fn failing_listeners_do_not_starve_others() {
    let engine = engine();
    let q = engine
        .register_query(WindowQuery::new("all", "Stock", WindowSpec::Length(1)))
        .unwrap();

    engine
        .subscribe_fn(q, |_| Err(anyhow::anyhow!("downstream unavailable")))
        .unwrap();
    engine
        .subscribe_fn(q, |_| panic!("listener bug"))
        .unwrap();
    let healthy = collect(&engine, q);

    engine.ingest("Stock", stock("a", 1.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("b", 2.0), Utc::now()).unwrap();

    assert_eq!(healthy.lock().len(), 2);
    assert_eq!(engine.metrics().listener_failures, 4);
}

#[test]
fn shutdown_is_idempotent_and_rejects_events() {
    let engine = engine();
    let q = growth_query(&engine);
    engine.ingest("Stock", stock("apple", 1.0), Utc::now()).unwrap();
    engine.ingest("Stock", stock("cisco", 1.0), Utc::now()).unwrap();

    let first = engine.shutdown();
    assert!(first.first_shutdown);
    assert_eq!(first.pending_discarded, 2);
    assert!(first.queries_timed_out.is_empty());
    assert_eq!(engine.pending_matches(q).unwrap(), 0);

    assert_eq!(
        engine.ingest("Stock", stock("apple", 2.0), Utc::now()),
        Err(IngestError::ShuttingDown)
    );
    assert_eq!(
        engine.advance_watermark(Utc::now()),
        Err(IngestError::ShuttingDown)
    );

    let second = engine.shutdown();
    assert!(!second.first_shutdown);
    assert_eq!(second.pending_discarded, 0);
    assert_eq!(second.metrics.events_rejected, 1);
}

#[test]
fn pattern_correlates_int_key_with_float_key() {
    let engine = engine();
    engine
        .register_type("Order", EventSchema::new().with_field("id", FieldType::Int))
        .unwrap();
    engine
        .register_type("Fill", EventSchema::new().with_field("oid", FieldType::Float))
        .unwrap();
    let q = engine
        .register_query(
            PatternQuery::new("filled")
                .first("o", "Order")
                .then("f", "Fill")
                .correlate("id", "oid")
                .within(Duration::from_secs(1))
                .select("id", Expr::field("o", "id")),
        )
        .unwrap();
    let updates = collect(&engine, q);

    engine
        .ingest("Order", fields([("id", Value::Int(1))]), Utc::now())
        .unwrap();
    engine
        .ingest("Fill", fields([("oid", Value::Float(1.0))]), Utc::now())
        .unwrap();

    let rows = new_rows(&updates);
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get_int("id"), Some(1));
}
