//! Telemetry for the host binding.
//!
//! Counters for query outcomes and external dispatch, plus a small timing span.
//! Structured logs go through `tracing`; this module only keeps numbers.

use crate::config::TelemetryConfig;

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// How a query ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryOutcome {
    /// The engine reported no further events
    Completed,
    /// The query failed
    Errored,
    /// The caller dropped the query before it finished
    Abandoned,
}

/// Telemetry instance for recording query and dispatch counters.
pub struct Telemetry {
    service_name: String,
    queries_started: AtomicU64,
    queries_completed: AtomicU64,
    queries_errored: AtomicU64,
    queries_abandoned: AtomicU64,
    results: AtomicU64,
    external_calls: AtomicU64,
    application_errors: AtomicU64,
    /// Total query time in microseconds
    total_query_time_us: AtomicU64,
}

impl Telemetry {
    /// Create a new telemetry instance.
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            service_name: config.service_name.clone(),
            queries_started: AtomicU64::new(0),
            queries_completed: AtomicU64::new(0),
            queries_errored: AtomicU64::new(0),
            queries_abandoned: AtomicU64::new(0),
            results: AtomicU64::new(0),
            external_calls: AtomicU64::new(0),
            application_errors: AtomicU64::new(0),
            total_query_time_us: AtomicU64::new(0),
        }
    }

    /// Record the start of a query.
    pub fn record_query_started(&self) {
        self.queries_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one solution yielded to the caller.
    pub fn record_result(&self) {
        self.results.fetch_add(1, Ordering::Relaxed);
    }

    /// Record one dispatched external event.
    pub fn record_external_call(&self) {
        self.external_calls.fetch_add(1, Ordering::Relaxed);
    }

    /// Record a host callback failure.
    pub fn record_application_error(&self) {
        self.application_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how a query ended and how long it lived.
    pub fn record_query_finished(&self, outcome: QueryOutcome, duration_ms: f64) {
        match outcome {
            QueryOutcome::Completed => self.queries_completed.fetch_add(1, Ordering::Relaxed),
            QueryOutcome::Errored => self.queries_errored.fetch_add(1, Ordering::Relaxed),
            QueryOutcome::Abandoned => self.queries_abandoned.fetch_add(1, Ordering::Relaxed),
        };

        let duration_us = (duration_ms * 1000.0) as u64;
        self.total_query_time_us
            .fetch_add(duration_us, Ordering::Relaxed);
    }

    /// Get current metrics.
    pub fn metrics(&self) -> TelemetryMetrics {
        let completed = self.queries_completed.load(Ordering::Relaxed);
        let errored = self.queries_errored.load(Ordering::Relaxed);
        let abandoned = self.queries_abandoned.load(Ordering::Relaxed);
        let finished = completed + errored + abandoned;

        let total_time_us = self.total_query_time_us.load(Ordering::Relaxed);
        let avg_query_time_ms = if finished > 0 {
            (total_time_us as f64 / finished as f64) / 1000.0
        } else {
            0.0
        };

        TelemetryMetrics {
            queries_started: self.queries_started.load(Ordering::Relaxed),
            queries_completed: completed,
            queries_errored: errored,
            queries_abandoned: abandoned,
            results: self.results.load(Ordering::Relaxed),
            external_calls: self.external_calls.load(Ordering::Relaxed),
            application_errors: self.application_errors.load(Ordering::Relaxed),
            avg_query_time_ms,
        }
    }

    /// Service name attached to query spans.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }
}

/// Metrics collected by telemetry.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct TelemetryMetrics {
    /// Queries created
    pub queries_started: u64,
    /// Queries that ran to exhaustion
    pub queries_completed: u64,
    /// Queries that ended in an error
    pub queries_errored: u64,
    /// Queries dropped before exhaustion
    pub queries_abandoned: u64,
    /// Solutions yielded
    pub results: u64,
    /// External events dispatched to host code
    pub external_calls: u64,
    /// Host callback failures
    pub application_errors: u64,
    /// Average query lifetime in milliseconds
    pub avg_query_time_ms: f64,
}

/// A span for timing operations.
pub struct Span {
    start: Instant,
}

impl Span {
    /// Start timing now.
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    /// Get the elapsed time in milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }
}

impl Default for Span {
    fn default() -> Self {
        Self::new()
    }
}

/// Create a new span for timing.
pub fn span() -> Span {
    Span::new()
}
