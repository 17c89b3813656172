//! Listener dispatch
//!
//! Listeners run synchronously on the thread that produced the update, in
//! subscription order. A listener that returns an error or panics is
//! logged and counted; the remaining listeners and the producer carry on.

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

use ceplite_core::Value;

use super::types::QueryHandle;
use crate::event::Fields;

/// One output row of a query
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub fields: Fields,
    /// Timestamp of the event that produced the row
    pub timestamp: DateTime<Utc>,
}

impl ResultRow {
    pub fn new(fields: Fields, timestamp: DateTime<Utc>) -> Self {
        Self { fields, timestamp }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }

    pub fn get_float(&self, field: &str) -> Option<f64> {
        self.fields.get(field).and_then(|v| v.as_float())
    }

    pub fn get_int(&self, field: &str) -> Option<i64> {
        self.fields.get(field).and_then(|v| v.as_int())
    }

    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.fields.get(field).and_then(|v| v.as_str())
    }

    /// Hand the fields over, e.g. to re-ingest the row as a derived event.
    pub fn into_fields(self) -> Fields {
        self.fields
    }
}

/// A change in a query's output
#[derive(Debug, Clone, Serialize)]
pub struct QueryUpdate {
    pub handle: QueryHandle,
    pub query: Arc<str>,
    pub new_rows: Vec<ResultRow>,
    pub expired_rows: Vec<ResultRow>,
}

impl QueryUpdate {
    pub fn is_empty(&self) -> bool {
        self.new_rows.is_empty() && self.expired_rows.is_empty()
    }
}

/// Trait for query subscribers
pub trait Listener: Send + Sync {
    /// Name used in log lines
    fn name(&self) -> &str {
        "listener"
    }

    fn on_update(&self, update: &QueryUpdate) -> Result<()>;
}

/// Adapts a closure to [`Listener`]
pub struct FnListener<F> {
    name: String,
    f: F,
}

impl<F> FnListener<F>
where
    F: Fn(&QueryUpdate) -> Result<()> + Send + Sync,
{
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> Listener for FnListener<F>
where
    F: Fn(&QueryUpdate) -> Result<()> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn on_update(&self, update: &QueryUpdate) -> Result<()> {
        (self.f)(update)
    }
}

/// Deliver `update` to every listener. Returns the number of failures.
pub(crate) fn dispatch(listeners: &[Arc<dyn Listener>], update: &QueryUpdate) -> usize {
    let mut failures = 0;
    for listener in listeners {
        match catch_unwind(AssertUnwindSafe(|| listener.on_update(update))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                failures += 1;
                error!(
                    "Listener '{}' on query '{}' failed: {:#}",
                    listener.name(),
                    update.query,
                    e
                );
            }
            Err(panic) => {
                failures += 1;
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Listener '{}' on query '{}' panicked: {}",
                    listener.name(),
                    update.query,
                    msg
                );
            }
        }
    }
    failures
}
