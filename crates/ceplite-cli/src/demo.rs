//! Demo pipelines
//!
//! `finance`: a growth pattern over daily stock closes whose listener feeds
//! each match back into the engine as a `Growth` event, joined apple versus
//! cisco. `sentiment`: tweet counts per sentiment and keyword over a ten
//! second window.

use anyhow::{Context, Result};
use ceplite_core::{EventSchema, FieldType};
use ceplite_runtime::aggregation::AggregateFunc;
use ceplite_runtime::query::{AggregateQuery, Expr, JoinInput, JoinQuery, PatternQuery, Predicate};
use ceplite_runtime::{Engine, IngestError, QueryHandle, ShutdownReport, WindowSpec};
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::Config;
use crate::simulator::{self, StockWalk, TweetGenerator};

// =============================================================================
// Finance
// =============================================================================

#[derive(Debug, Clone, Copy)]
pub struct FinanceQueries {
    pub growth: QueryHandle,
    pub diff: QueryHandle,
}

#[derive(Debug)]
pub struct FinanceSummary {
    pub stock_events: usize,
    pub growth_events: usize,
    pub joined_rows: usize,
    pub shutdown: ShutdownReport,
}

/// Register the `Stock` and `Growth` types and the two finance queries.
pub fn register_finance(engine: &Engine) -> Result<FinanceQueries> {
    engine.register_type(
        "Stock",
        EventSchema::new()
            .with_field("key", FieldType::Str)
            .with_field("closing", FieldType::Float)
            .with_field("date", FieldType::Timestamp),
    )?;
    engine.register_type(
        "Growth",
        EventSchema::new()
            .with_field("key", FieldType::Str)
            .with_field("growth", FieldType::Float),
    )?;

    let growth = engine.register_query(
        PatternQuery::new("growth")
            .first("a", "Stock")
            .then("b", "Stock")
            .correlate("key", "key")
            .within(Duration::from_secs(1))
            .select("key", Expr::field("a", "key"))
            .select("growth", Expr::field("b", "closing").sub(Expr::field("a", "closing"))),
    )?;

    let diff = engine.register_query(
        JoinQuery::new(
            "apple_vs_cisco",
            JoinInput::new("apple", "Growth", WindowSpec::Length(1))
                .filter(Predicate::eq("key", "apple")),
            JoinInput::new("cisco", "Growth", WindowSpec::Length(1))
                .filter(Predicate::eq("key", "cisco")),
        )
        .select("apple", Expr::field("apple", "growth"))
        .select("cisco", Expr::field("cisco", "growth"))
        .select("diff", Expr::field("cisco", "growth").sub(Expr::field("apple", "growth"))),
    )?;

    Ok(FinanceQueries { growth, diff })
}

fn start_price(ticker: &str) -> f64 {
    match ticker {
        "apple" => 105.0,
        "cisco" => 26.0,
        "ibm" => 150.0,
        _ => 50.0,
    }
}

pub fn run_finance(config: &Config) -> Result<FinanceSummary> {
    let engine = Engine::new(config.engine.clone());
    let queries = register_finance(&engine)?;

    let growth_events = Arc::new(AtomicUsize::new(0));
    let joined_rows = Arc::new(AtomicUsize::new(0));

    let chained = engine.clone();
    let counter = Arc::clone(&growth_events);
    engine.subscribe_fn(queries.growth, move |update| {
        for row in &update.new_rows {
            info!(
                "{} grew by {:.2}",
                row.get_str("key").unwrap_or("?"),
                row.get_float("growth").unwrap_or_default()
            );
            counter.fetch_add(1, Ordering::Relaxed);
            chained
                .ingest("Growth", row.clone().into_fields(), row.timestamp)
                .context("re-ingesting growth")?;
        }
        Ok(())
    })?;

    let counter = Arc::clone(&joined_rows);
    engine.subscribe_fn(queries.diff, move |update| {
        for row in &update.new_rows {
            info!(
                "cisco - apple growth: {:.2} (apple {:.2}, cisco {:.2})",
                row.get_float("diff").unwrap_or_default(),
                row.get_float("apple").unwrap_or_default(),
                row.get_float("cisco").unwrap_or_default()
            );
            counter.fetch_add(1, Ordering::Relaxed);
        }
        Ok(())
    })?;

    let sim = &config.simulation;
    let producers: Vec<_> = sim
        .tickers
        .iter()
        .enumerate()
        .map(|(i, ticker)| {
            let engine = engine.clone();
            let ticker = ticker.clone();
            let records = sim.records;
            let max_delay = sim.max_delay();
            let seed = sim.seed.map(|s| s.wrapping_add(i as u64));
            thread::Builder::new()
                .name(format!("producer-{}", ticker))
                .spawn(move || produce_stocks(&engine, &ticker, records, max_delay, seed))
        })
        .collect::<std::io::Result<_>>()?;

    let mut stock_events = 0;
    for producer in producers {
        match producer.join() {
            Ok(n) => stock_events += n,
            Err(_) => warn!("Producer thread panicked"),
        }
    }

    let shutdown = engine.shutdown();
    Ok(FinanceSummary {
        stock_events,
        growth_events: growth_events.load(Ordering::Relaxed),
        joined_rows: joined_rows.load(Ordering::Relaxed),
        shutdown,
    })
}

fn produce_stocks(
    engine: &Engine,
    ticker: &str,
    records: usize,
    max_delay: Duration,
    seed: Option<u64>,
) -> usize {
    let mut rng = simulator::rng(seed);
    let mut sent = 0;
    for record in StockWalk::new(ticker, start_price(ticker), seed).take(records) {
        match engine.ingest("Stock", record.fields(), record.date) {
            Ok(()) => sent += 1,
            Err(IngestError::ShuttingDown) => break,
            Err(e) => warn!("{} record rejected: {}", ticker, e),
        }
        simulator::pace(&mut rng, max_delay);
    }
    info!("Producer {} finished after {} records", ticker, sent);
    sent
}

// =============================================================================
// Sentiment
// =============================================================================

#[derive(Debug)]
pub struct SentimentSummary {
    pub tweets: usize,
    /// Latest count per `keyword-sentiment`
    pub counts: BTreeMap<String, i64>,
    pub shutdown: ShutdownReport,
}

pub fn register_sentiment(engine: &Engine) -> Result<QueryHandle> {
    engine.register_type(
        "Tweet",
        EventSchema::new()
            .with_field("id", FieldType::Int)
            .with_field("message", FieldType::Str)
            .with_field("likes", FieldType::Int)
            .with_field("user", FieldType::Str)
            .with_field("sentiment", FieldType::Str)
            .with_field("keyword", FieldType::Str),
    )?;
    let handle = engine.register_query(
        AggregateQuery::new(
            "sentiment_counts",
            "Tweet",
            WindowSpec::Time(Duration::from_secs(10)),
            AggregateFunc::Count,
        )
        .group_by("sentiment")
        .group_by("keyword")
        .output("counter"),
    )?;
    Ok(handle)
}

fn group_key(row: &ceplite_runtime::ResultRow) -> String {
    format!(
        "{}-{}",
        row.get_str("keyword").unwrap_or("?"),
        row.get_str("sentiment").unwrap_or("?")
    )
}

pub fn run_sentiment(config: &Config) -> Result<SentimentSummary> {
    let engine = Engine::new(config.engine.clone());
    let handle = register_sentiment(&engine)?;

    let counts = Arc::new(Mutex::new(BTreeMap::new()));
    let table = Arc::clone(&counts);
    engine.subscribe_fn(handle, move |update| {
        let mut table = table.lock();
        for row in &update.expired_rows {
            table.remove(&group_key(row));
        }
        for row in &update.new_rows {
            table.insert(group_key(row), row.get_int("counter").unwrap_or_default());
        }
        info!("Counts: {:?}", *table);
        Ok(())
    })?;

    let sim = &config.simulation;
    let mut rng = simulator::rng(sim.seed);
    let mut tweets = 0;
    for tweet in TweetGenerator::new(sim.seed).take(sim.records) {
        engine.ingest("Tweet", tweet.fields(), Utc::now())?;
        tweets += 1;
        simulator::pace(&mut rng, sim.max_delay());
    }

    let shutdown = engine.shutdown();
    let counts = counts.lock().clone();
    Ok(SentimentSummary {
        tweets,
        counts,
        shutdown,
    })
}
