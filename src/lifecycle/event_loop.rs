use std::sync::Arc;

use super::worker::WorkerCore;
use super::{HealthStatus, LifecycleManager, MemoryProbe, RequestMetric, WorkerStats};
use crate::config::RuntimeConfig;
use crate::request::{Request, RequestContext, Response};

/// Long-running worker driven by a single-threaded event loop. Several
/// requests may be in flight at once; `worker_stats` reports how many.
pub struct EventLoopLifecycle {
    core: WorkerCore,
}

impl EventLoopLifecycle {
    pub fn new(config: &RuntimeConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            core: WorkerCore::new("event-loop", config, probe),
        }
    }
}

impl LifecycleManager for EventLoopLifecycle {
    fn on_boot(&self) {
        self.core.boot();
    }

    fn on_request_start(&self, ctx: &RequestContext, _request: &Request) {
        self.core.request_started(ctx);
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
        "event-loop"
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
