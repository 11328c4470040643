use std::sync::Arc;

use super::worker::WorkerCore;
use super::{HealthStatus, LifecycleManager, MemoryProbe, RequestMetric, WorkerStats};
use crate::config::RuntimeConfig;
use crate::request::{Request, RequestContext, Response};

/// Long-running worker that serves requests strictly one at a time.
///
/// The supervisor owns restarts; this manager only raises the signal in
/// [`health`](LifecycleManager::health) once memory or request ceilings are hit.
pub struct WorkerPoolLifecycle {
    core: WorkerCore,
}

impl WorkerPoolLifecycle {
    pub fn new(config: &RuntimeConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            core: WorkerCore::new("worker-pool", config, probe),
        }
    }
}

impl LifecycleManager for WorkerPoolLifecycle {
    fn on_boot(&self) {
        self.core.boot();
    }

    fn on_request_start(&self, ctx: &RequestContext, _request: &Request) {
        let in_flight = self.core.request_started(ctx);
        if in_flight > 1 {
            tracing::warn!(
                request_id = %ctx.id(),
                in_flight,
                "overlapping requests on a sequential worker"
            );
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
        "worker-pool"
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
