//! Main execution engine
//!
//! The [`Engine`] owns the type registry and every registered query. It is a
//! cheap `Clone` handle: producers on any number of threads call
//! [`Engine::ingest`], and listeners may call it again to chain queries.
//!
//! Each query's state sits behind its own re-entrant lock, held while the
//! query evaluates an event and while its listeners run. A listener that
//! ingests on the same thread re-enters freely; other threads wait. The
//! `RefCell` inside the lock is only borrowed during evaluation, never
//! across listener calls.

mod compiler;
mod listener;
mod pipeline;
mod router;
mod types;


pub use listener::{FnListener, Listener, QueryUpdate, ResultRow};
pub use types::{EngineMetrics, QueryHandle, ShutdownReport};

use chrono::{DateTime, Utc};
use parking_lot::{ReentrantMutex, RwLock};
use std::cell::RefCell;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, info, trace, warn};

use ceplite_core::EventSchema;

use crate::config::EngineConfig;
use crate::error::{IngestError, RegistrationError};
use crate::event::{Event, Fields, SharedEvent};
use crate::query::QueryDescriptor;
use crate::registry::TypeRegistry;
use crate::timer::TimerService;
use pipeline::{Output, QueryState};
use router::EventRouter;
use types::Counters;

/// A registered query with its state and subscribers
struct QueryCell {
    handle: QueryHandle,
    name: Arc<str>,
    kind: &'static str,
    state: ReentrantMutex<RefCell<QueryState>>,
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
}

struct EngineInner {
    config: EngineConfig,
    registry: RwLock<TypeRegistry>,
    queries: RwLock<Vec<Arc<QueryCell>>>,
    router: RwLock<EventRouter>,
    seq: AtomicU64,
    accepting: AtomicBool,
    timers: TimerService,
    counters: Counters,
}

/// The continuous query engine
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("config", &self.inner.config)
            .field("queries", &self.inner.queries.read().len())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        info!("Creating engine (timer mode: {:?})", config.timer_mode);
        Self {
            inner: Arc::new(EngineInner {
                config,
                registry: RwLock::new(TypeRegistry::new()),
                queries: RwLock::new(Vec::new()),
                router: RwLock::new(EventRouter::new()),
                seq: AtomicU64::new(0),
                accepting: AtomicBool::new(true),
                timers: TimerService::new(),
                counters: Counters::default(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Register an event type. Re-registering an identical schema is a no-op.
    pub fn register_type(&self, name: &str, schema: EventSchema) -> Result<(), RegistrationError> {
        self.inner.registry.write().register(name, schema)
    }

    pub fn schema(&self, name: &str) -> Option<Arc<EventSchema>> {
        self.inner.registry.read().get(name).cloned()
    }

    /// Compile and register a query. Its input types must already be registered.
    pub fn register_query(
        &self,
        descriptor: impl Into<QueryDescriptor>,
    ) -> Result<QueryHandle, RegistrationError> {
        let descriptor = descriptor.into();
        let state = compiler::compile(
            &descriptor,
            &self.inner.registry.read(),
            &self.inner.config,
        )?;

        let mut queries = self.inner.queries.write();
        let handle = QueryHandle(queries.len());
        let kind = state.kind();
        queries.push(Arc::new(QueryCell {
            handle,
            name: Arc::from(descriptor.name()),
            kind,
            state: ReentrantMutex::new(RefCell::new(state)),
            listeners: RwLock::new(Vec::new()),
        }));
        let mut router = self.inner.router.write();
        for event_type in descriptor.input_types() {
            router.add_route(event_type, handle.0);
        }
        info!(
            "Registered {} query: {} {} (inputs: {:?})",
            kind,
            descriptor.name(),
            handle,
            descriptor.input_types()
        );
        Ok(handle)
    }

    fn cell(&self, handle: QueryHandle) -> Result<Arc<QueryCell>, RegistrationError> {
        self.inner
            .queries
            .read()
            .get(handle.0)
            .cloned()
            .ok_or(RegistrationError::UnknownQuery(handle))
    }

    /// Attach a listener to a query. Listeners run in subscription order.
    pub fn subscribe<L>(&self, handle: QueryHandle, listener: L) -> Result<(), RegistrationError>
    where
        L: Listener + 'static,
    {
        let cell = self.cell(handle)?;
        debug!("Listener '{}' subscribed to query '{}'", listener.name(), cell.name);
        cell.listeners.write().push(Arc::new(listener));
        Ok(())
    }

    /// Attach a closure as a listener.
    pub fn subscribe_fn<F>(&self, handle: QueryHandle, f: F) -> Result<(), RegistrationError>
    where
        F: Fn(&QueryUpdate) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let name = format!("listener-{}", handle);
        self.subscribe(handle, FnListener::new(name, f))
    }

    pub fn query_name(&self, handle: QueryHandle) -> Option<String> {
        self.cell(handle).ok().map(|c| c.name.to_string())
    }

    pub fn query_count(&self) -> usize {
        self.inner.queries.read().len()
    }

    // =========================================================================
    // Ingestion
    // =========================================================================

    /// Offer one event to every query that consumes its type.
    ///
    /// The event is validated before any state is touched, so a rejected
    /// event leaves the engine exactly as it was. Queries evaluate in
    /// registration order and their listeners run before this returns.
    pub fn ingest(
        &self,
        type_name: &str,
        fields: Fields,
        timestamp: DateTime<Utc>,
    ) -> Result<(), IngestError> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::Acquire) {
            Counters::add(&inner.counters.events_rejected, 1);
            return Err(IngestError::ShuttingDown);
        }
        if let Err(e) = inner.registry.read().validate(type_name, &fields) {
            Counters::add(&inner.counters.events_rejected, 1);
            warn!("Rejected event: {}", e);
            return Err(e);
        }

        let seq = inner.seq.fetch_add(1, Ordering::SeqCst) + 1;
        let event: SharedEvent = Arc::new(Event::from_fields(type_name, timestamp, seq, fields));
        Counters::add(&inner.counters.events_ingested, 1);
        trace!("Ingesting {} #{} at {}", type_name, seq, timestamp);

        let routes = inner.router.read().routes(type_name);
        let cells: Vec<Arc<QueryCell>> = {
            let queries = inner.queries.read();
            routes.iter().filter_map(|&i| queries.get(i).cloned()).collect()
        };
        for cell in &cells {
            inner.evaluate(cell, &event);
        }
        Ok(())
    }

    /// Move event time forward to `watermark` without an event.
    ///
    /// Time windows evict everything older than `watermark - duration` and
    /// report the change to listeners. In event-time mode pattern
    /// state whose deadline has passed is discarded.
    pub fn advance_watermark(&self, watermark: DateTime<Utc>) -> Result<(), IngestError> {
        if !self.is_accepting() {
            return Err(IngestError::ShuttingDown);
        }
        debug!("Advancing watermark to {}", watermark);
        let cells: Vec<Arc<QueryCell>> = self.inner.queries.read().clone();
        for cell in &cells {
            let guard = cell.state.lock();
            let output = guard
                .borrow_mut()
                .advance_to(watermark, self.inner.config.timer_mode);
            self.inner.finish(cell, output);
            drop(guard);
        }
        Ok(())
    }

    /// Live window contents of a query, for inspection.
    pub fn snapshot(&self, handle: QueryHandle) -> Result<Vec<SharedEvent>, RegistrationError> {
        let cell = self.cell(handle)?;
        let guard = cell.state.lock();
        let events = guard.borrow().snapshot();
        Ok(events)
    }

    /// Number of partial pattern matches awaiting their second stage.
    pub fn pending_matches(&self, handle: QueryHandle) -> Result<usize, RegistrationError> {
        let cell = self.cell(handle)?;
        let guard = cell.state.lock();
        let pending = guard.borrow().pending_len();
        Ok(pending)
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> EngineMetrics {
        self.inner.counters.snapshot(self.query_count())
    }

    /// Stop accepting events and drop all pending pattern state.
    ///
    /// Waits up to `shutdown_timeout_ms` per query for an in-flight
    /// evaluation to finish. Timers are cancelled first so no late match is
    /// emitted. Calling it again returns a report with `first_shutdown`
    /// unset.
    pub fn shutdown(&self) -> ShutdownReport {
        let inner = &self.inner;
        let first_shutdown = inner.accepting.swap(false, Ordering::AcqRel);
        inner.timers.stop();

        let mut report = ShutdownReport {
            first_shutdown,
            ..Default::default()
        };
        let timeout = inner.config.shutdown_timeout();
        let cells: Vec<Arc<QueryCell>> = inner.queries.read().clone();
        for cell in &cells {
            let Some(guard) = cell.state.try_lock_for(timeout) else {
                warn!("Query '{}' still busy after {:?}", cell.name, timeout);
                report.queries_timed_out.push(cell.name.to_string());
                continue;
            };
            let discarded = match guard.try_borrow_mut() {
                Ok(mut state) => Some(state.clear_pending()),
                Err(_) => None,
            };
            drop(guard);
            match discarded {
                Some(n) => report.pending_discarded += n,
                None => report.queries_timed_out.push(cell.name.to_string()),
            }
        }
        report.metrics = self.metrics();
        if first_shutdown {
            info!(
                "Engine shut down: {} events ingested, {} rows emitted, {} pending matches discarded",
                report.metrics.events_ingested, report.metrics.rows_emitted, report.pending_discarded
            );
        }
        report
    }
}

impl EngineInner {
    /// Evaluate one event against one query and dispatch the result while
    /// still holding the query lock.
    fn evaluate(self: &Arc<Self>, cell: &Arc<QueryCell>, event: &SharedEvent) {
        let guard = cell.state.lock();
        // Shutdown may have cleared this query while the event was in flight.
        if !self.accepting.load(Ordering::Acquire) {
            trace!("Query '{}' skipped event #{} after shutdown", cell.name, event.seq);
            return;
        }
        let output = guard.borrow_mut().process(event, self.config.timer_mode);
        if let Some(deadline) = output.armed {
            self.schedule_timeout(cell, deadline);
        }
        self.finish(cell, output);
        drop(guard);
    }

    /// Count and dispatch an evaluation step. Caller holds the query lock.
    fn finish(&self, cell: &QueryCell, output: Output) {
        Counters::add(&self.counters.pattern_timeouts, output.timeouts);
        if !output.has_rows() {
            return;
        }
        Counters::add(&self.counters.rows_emitted, output.new_rows.len());
        let update = QueryUpdate {
            handle: cell.handle,
            query: Arc::clone(&cell.name),
            new_rows: output.new_rows,
            expired_rows: output.expired_rows,
        };
        trace!(
            "{} query '{}' emitting {} new, {} expired",
            cell.kind,
            cell.name,
            update.new_rows.len(),
            update.expired_rows.len()
        );
        let listeners: Vec<Arc<dyn Listener>> = cell.listeners.read().clone();
        let failures = listener::dispatch(&listeners, &update);
        Counters::add(&self.counters.listener_failures, failures);
    }

    fn schedule_timeout(self: &Arc<Self>, cell: &Arc<QueryCell>, deadline: DateTime<Utc>) {
        let engine: Weak<EngineInner> = Arc::downgrade(self);
        let target: Weak<QueryCell> = Arc::downgrade(cell);
        let scheduled = self.timers.schedule(deadline, move || {
            let (Some(engine), Some(cell)) = (engine.upgrade(), target.upgrade()) else {
                return;
            };
            engine.expire_pattern(&cell, Utc::now());
        });
        if !scheduled {
            trace!("Timeout for query '{}' not scheduled", cell.name);
        }
    }

    fn expire_pattern(&self, cell: &QueryCell, now: DateTime<Utc>) {
        let guard = cell.state.lock();
        let expired = guard.borrow_mut().expire_patterns(now);
        drop(guard);
        if expired > 0 {
            debug!("Query '{}' timed out {} partial matches", cell.name, expired);
            Counters::add(&self.counters.pattern_timeouts, expired);
        }
    }
}
