//! ceplite runtime - continuous query engine
//!
//! Register event types and standing queries once, then feed events from
//! any number of threads. Each query keeps its own windows, pattern state
//! or accumulators and notifies its listeners synchronously as its output
//! changes.
//!
//! ```rust
//! use ceplite_core::{EventSchema, FieldType, Value};
//! use ceplite_runtime::event::fields;
//! use ceplite_runtime::query::{Expr, PatternQuery};
//! use ceplite_runtime::{Engine, EngineConfig};
//! use chrono::{TimeDelta, Utc};
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use std::sync::Arc;
//! use std::time::Duration;
//!
//! let engine = Engine::new(EngineConfig::event_time());
//! engine.register_type(
//!     "Stock",
//!     EventSchema::new()
//!         .with_field("key", FieldType::Str)
//!         .with_field("closing", FieldType::Float),
//! )?;
//! let growth = engine.register_query(
//!     PatternQuery::new("growth")
//!         .first("a", "Stock")
//!         .then("b", "Stock")
//!         .within(Duration::from_secs(1))
//!         .select("growth", Expr::field("b", "closing").sub(Expr::field("a", "closing"))),
//! )?;
//!
//! let matches = Arc::new(AtomicUsize::new(0));
//! let seen = Arc::clone(&matches);
//! engine.subscribe_fn(growth, move |update| {
//!     seen.fetch_add(update.new_rows.len(), Ordering::SeqCst);
//!     Ok(())
//! })?;
//!
//! let t0 = Utc::now();
//! engine.ingest("Stock", fields([("key", "x".into()), ("closing", Value::Float(10.0))]), t0)?;
//! engine.ingest(
//!     "Stock",
//!     fields([("key", "x".into()), ("closing", Value::Float(12.0))]),
//!     t0 + TimeDelta::milliseconds(500),
//! )?;
//! assert_eq!(matches.load(Ordering::SeqCst), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod aggregation;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod join;
pub mod pattern;
pub mod query;
pub mod registry;
mod timer;
pub mod window;

pub use config::{EngineConfig, TimerMode};
pub use engine::{
    Engine, EngineMetrics, FnListener, Listener, QueryHandle, QueryUpdate, ResultRow,
    ShutdownReport,
};
pub use error::{IngestError, IngestResult, RegistrationError, RegistrationResult};
pub use event::{Event, Fields, SharedEvent};
pub use query::QueryDescriptor;
pub use window::WindowSpec;
