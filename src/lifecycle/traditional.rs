use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;

use super::{HealthStatus, LifecycleManager, MemoryProbe, WorkerStats};
use crate::request::{Request, RequestContext, Response};

/// One process per request. Hooks only log; the process discards everything
/// right after the response, so `on_terminate` runs after every request.
pub struct TraditionalLifecycle {
    probe: Arc<dyn MemoryProbe>,
    booted: AtomicBool,
    booted_at: Mutex<Option<Instant>>,
    requests: AtomicU64,
    terminations: AtomicU64,
}

impl TraditionalLifecycle {
    pub fn new(probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            probe,
            booted: AtomicBool::new(false),
            booted_at: Mutex::new(None),
            requests: AtomicU64::new(0),
            terminations: AtomicU64::new(0),
        }
    }

    /// How many times `on_terminate` has run.
    pub fn terminations(&self) -> u64 {
        self.terminations.load(Ordering::SeqCst)
    }
}

impl LifecycleManager for TraditionalLifecycle {
    fn on_boot(&self) {
        if self.booted.swap(true, Ordering::SeqCst) {
            return;
        }
        *self.booted_at.lock() = Some(Instant::now());
        tracing::info!(lifecycle = "traditional", "process booted");
    }

    fn on_request_start(&self, ctx: &RequestContext, _request: &Request) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(
            lifecycle = "traditional",
            request_id = %ctx.id(),
            method = %ctx.method(),
            path = ctx.path(),
            "request started"
        );
    }

    fn on_request_end(&self, ctx: &RequestContext, _request: &Request, response: &Response) {
        tracing::debug!(
            lifecycle = "traditional",
            request_id = %ctx.id(),
            status = response.status().as_u16(),
            duration_ms = ctx.elapsed().as_millis() as u64,
            "request finished"
        );
    }

    fn on_terminate(&self) {
        let count = self.terminations.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(lifecycle = "traditional", terminations = count, "process terminating");
    }

    fn lifecycle_type(&self) -> &'static str {
        "traditional"
    }

    fn is_long_running(&self) -> bool {
        false
    }

    fn worker_stats(&self) -> WorkerStats {
        let memory = self.probe.current();
        WorkerStats {
            uptime: self.booted_at.lock().map(|t| t.elapsed()).unwrap_or_default(),
            requests_handled: self.requests.load(Ordering::SeqCst),
            memory_usage: memory,
            memory_peak: memory,
            ..WorkerStats::default()
        }
    }

    fn health(&self) -> HealthStatus {
        HealthStatus::default()
    }

    fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }
}
