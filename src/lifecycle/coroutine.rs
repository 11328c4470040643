use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::worker::WorkerCore;
use super::{HealthStatus, LifecycleManager, MemoryProbe, RequestMetric, WorkerStats};
use crate::config::RuntimeConfig;
use crate::request::{Request, RequestContext, Response};

/// Long-running worker multiplexing many coroutines. Each new concurrency
/// high-water mark is logged at `debug`.
pub struct CoroutineLifecycle {
    core: WorkerCore,
    high_water: AtomicUsize,
}

impl CoroutineLifecycle {
    pub fn new(config: &RuntimeConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            core: WorkerCore::new("coroutine", config, probe),
            high_water: AtomicUsize::new(0),
        }
    }
}

impl LifecycleManager for CoroutineLifecycle {
    fn on_boot(&self) {
        self.core.boot();
    }

    fn on_request_start(&self, ctx: &RequestContext, _request: &Request) {
        let in_flight = self.core.request_started(ctx);
        if self.high_water.fetch_max(in_flight, Ordering::SeqCst) < in_flight {
            tracing::debug!(lifecycle = "coroutine", in_flight, "new concurrency peak");
        }
    }

    fn on_request_end(&self, ctx: &RequestContext, _request: &Request, response: &Response) {
        self.core.request_finished(ctx, response);
    }

    fn on_request_abandoned(&self, ctx: &RequestContext, _request: &Request) {
        self.core.request_abandoned(ctx);
    }

    fn on_terminate(&self) {
        self.core.terminate();
    }

    fn lifecycle_type(&self) -> &'static str {
        "coroutine"
    }

    fn is_long_running(&self) -> bool {
        true
    }

    fn worker_stats(&self) -> WorkerStats {
        self.core.stats()
    }

    fn health(&self) -> HealthStatus {
        self.core.health()
    }

    fn is_booted(&self) -> bool {
        self.core.is_booted()
    }

    fn recent_requests(&self) -> Vec<RequestMetric> {
        self.core.recent()
    }
}
