//! Per-profile lifecycle hooks and worker statistics.
//!
//! Every process has exactly one [`LifecycleManager`], chosen by
//! [`for_profile`] from the detected [`RuntimeProfile`]. Hooks fire in the
//! order `on_boot` → (`on_request_start` → `on_request_end`)* → `on_terminate`.
//!
//! Long-running variants count requests, keep a bounded window of recent
//! request metrics, and run health checks that *signal* a restart through
//! [`LifecycleManager::health`]. Enforcing the restart is the job of whatever
//! supervises the worker.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::RuntimeConfig;
use crate::profile::RuntimeProfile;
use crate::request::{Request, RequestContext, Response};

mod coroutine;
mod event_loop;
mod memory;
mod traditional;
mod worker;
mod worker_pool;

pub use coroutine::CoroutineLifecycle;
pub use event_loop::EventLoopLifecycle;
pub use memory::{FixedMemory, MemoryProbe, ProcessMemory};
pub use traditional::TraditionalLifecycle;
pub use worker_pool::WorkerPoolLifecycle;

/// Snapshot of worker counters, computed on demand.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkerStats {
    /// Time since boot
    pub uptime: Duration,
    pub requests_handled: u64,
    /// Resident memory now, in bytes
    pub memory_usage: u64,
    /// Highest resident memory observed, in bytes
    pub memory_peak: u64,
    /// Mean duration over the recent-request window
    pub average_request_time: Duration,
    /// Requests currently between start and end hooks
    pub in_flight: usize,
    /// Highest number of simultaneous in-flight requests observed
    pub peak_in_flight: usize,
}

/// Advisory health signal for an external supervisor. Logged, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorkerHealthWarning {
    /// Resident memory crossed 80% of the configured limit
    MemoryThresholdExceeded { current: u64, threshold: u64 },
    /// The worker has served its configured maximum number of requests
    MaxRequestsReached { handled: u64, max: u64 },
}

impl fmt::Display for WorkerHealthWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkerHealthWarning::MemoryThresholdExceeded { current, threshold } => write!(
                f,
                "memory usage {} bytes exceeds threshold {} bytes",
                current, threshold
            ),
            WorkerHealthWarning::MaxRequestsReached { handled, max } => {
                write!(f, "handled {} of at most {} requests", handled, max)
            }
        }
    }
}

/// Result of the most recent health check.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    /// The worker asks its supervisor to recycle it
    pub should_restart: bool,
    pub warnings: Vec<WorkerHealthWarning>,
}

/// One entry of the recent-request window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetric {
    pub request_id: Uuid,
    pub duration: Duration,
    /// Resident memory when the request ended, in bytes
    pub memory: u64,
    pub status: u16,
}

/// Lifecycle hooks for one execution model.
pub trait LifecycleManager: Send + Sync {
    /// One-time warm-up. A second call is a no-op.
    fn on_boot(&self);

    /// Before a request's business logic.
    fn on_request_start(&self, ctx: &RequestContext, request: &Request);

    /// After business logic, before the response leaves the process.
    fn on_request_end(&self, ctx: &RequestContext, request: &Request, response: &Response);

    /// When a started request is dropped before producing a response.
    fn on_request_abandoned(&self, _ctx: &RequestContext, _request: &Request) {}

    /// When the process is actually shutting down.
    fn on_terminate(&self);

    /// Static name of the variant, e.g. `"worker-pool"`.
    fn lifecycle_type(&self) -> &'static str;

    fn is_long_running(&self) -> bool;

    fn worker_stats(&self) -> WorkerStats;

    /// Outcome of the latest health check.
    fn health(&self) -> HealthStatus;

    fn is_booted(&self) -> bool;

    /// Recent request metrics, oldest first. Empty for the traditional variant.
    fn recent_requests(&self) -> Vec<RequestMetric> {
        Vec::new()
    }
}

/// Builds the lifecycle manager for a profile.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{lifecycle, FixedMemory, RuntimeConfig, RuntimeProfile};
/// use std::sync::Arc;
///
/// let probe = Arc::new(FixedMemory::new(0));
/// let manager = lifecycle::for_profile(RuntimeProfile::EventLoop, &RuntimeConfig::default(), probe);
/// assert_eq!(manager.lifecycle_type(), "event-loop");
/// assert!(manager.is_long_running());
/// ```
pub fn for_profile(
    profile: RuntimeProfile,
    config: &RuntimeConfig,
    probe: Arc<dyn MemoryProbe>,
) -> Arc<dyn LifecycleManager> {
    match profile {
        RuntimeProfile::Traditional => Arc::new(TraditionalLifecycle::new(probe)),
        RuntimeProfile::WorkerPoolSync => Arc::new(WorkerPoolLifecycle::new(config, probe)),
        RuntimeProfile::EventLoop => Arc::new(EventLoopLifecycle::new(config, probe)),
        RuntimeProfile::CoroutineWorker => Arc::new(CoroutineLifecycle::new(config, probe)),
    }
}
