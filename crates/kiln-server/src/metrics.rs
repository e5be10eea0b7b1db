//! Prometheus-compatible metrics for the sandbox server.
//!
//! Tracks invocation counts, streamed chunks, health probes, and in-flight work.

use std::sync::Arc;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

/// Shared metrics registry.
#[derive(Debug, Clone)]
pub struct Metrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    /// Total invocations accepted for dispatch.
    invocations_total: AtomicU64,
    /// Invocations that ended in an agent fault.
    invocation_errors_total: AtomicU64,
    /// Invocations answered with a chunk stream.
    stream_invocations_total: AtomicU64,
    /// Frames written to SSE responses.
    chunks_sent_total: AtomicU64,
    /// Requests rejected before dispatch (4xx/5xx).
    rejected_total: AtomicU64,
    /// Health probe calls.
    pings_total: AtomicU64,
    /// Invocations currently running.
    in_flight: AtomicI64,
    started_at: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner {
                invocations_total: AtomicU64::new(0),
                invocation_errors_total: AtomicU64::new(0),
                stream_invocations_total: AtomicU64::new(0),
                chunks_sent_total: AtomicU64::new(0),
                rejected_total: AtomicU64::new(0),
                pings_total: AtomicU64::new(0),
                in_flight: AtomicI64::new(0),
                started_at: Instant::now(),
            }),
        }
    }

    pub fn inc_invocations(&self) {
        self.inner.invocations_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_invocation_errors(&self) {
        self.inner
            .invocation_errors_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_stream_invocations(&self) {
        self.inner
            .stream_invocations_total
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_chunks_sent(&self) {
        self.inner.chunks_sent_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_rejected(&self) {
        self.inner.rejected_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_pings(&self) {
        self.inner.pings_total.fetch_add(1, Ordering::Relaxed);
    }

    /// Count an invocation as running until the returned guard drops.
    pub fn track_in_flight(&self) -> InFlight {
        self.inner.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlight {
            metrics: self.clone(),
        }
    }

    pub fn in_flight(&self) -> i64 {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Render metrics in Prometheus text exposition format.
    pub fn render_prometheus(&self, sessions: usize) -> String {
        let m = &self.inner;
        let uptime = m.started_at.elapsed().as_secs();

        format!(
            r#"# HELP kiln_uptime_seconds Time since the sandbox server started.
# TYPE kiln_uptime_seconds gauge
kiln_uptime_seconds {}

# HELP kiln_invocations_total Total invocations dispatched.
# TYPE kiln_invocations_total counter
kiln_invocations_total {}

# HELP kiln_invocation_errors_total Invocations that ended in an agent fault.
# TYPE kiln_invocation_errors_total counter
kiln_invocation_errors_total {}

# HELP kiln_stream_invocations_total Invocations answered with a chunk stream.
# TYPE kiln_stream_invocations_total counter
kiln_stream_invocations_total {}

# HELP kiln_chunks_sent_total Chunk frames written to streaming responses.
# TYPE kiln_chunks_sent_total counter
kiln_chunks_sent_total {}

# HELP kiln_rejected_requests_total Invocation requests rejected before dispatch.
# TYPE kiln_rejected_requests_total counter
kiln_rejected_requests_total {}

# HELP kiln_pings_total Health probe calls served.
# TYPE kiln_pings_total counter
kiln_pings_total {}

# HELP kiln_in_flight_invocations Invocations currently running.
# TYPE kiln_in_flight_invocations gauge
kiln_in_flight_invocations {}

# HELP kiln_sessions Sessions held by this sandbox.
# TYPE kiln_sessions gauge
kiln_sessions {}
"#,
            uptime,
            m.invocations_total.load(Ordering::Relaxed),
            m.invocation_errors_total.load(Ordering::Relaxed),
            m.stream_invocations_total.load(Ordering::Relaxed),
            m.chunks_sent_total.load(Ordering::Relaxed),
            m.rejected_total.load(Ordering::Relaxed),
            m.pings_total.load(Ordering::Relaxed),
            m.in_flight.load(Ordering::Relaxed),
            sessions,
        )
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

/// In-flight marker returned by [`Metrics::track_in_flight`].
#[derive(Debug)]
pub struct InFlight {
    metrics: Metrics,
}

impl Drop for InFlight {
    fn drop(&mut self) {
        self.metrics.inner.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
