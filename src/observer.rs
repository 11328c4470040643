//! Lifecycle observers.
//!
//! Observers are notified at each hook boundary of the application. They are
//! how tests script hook ordering and how operators wire the lifecycle into
//! their own telemetry without touching the handler.

use std::sync::Arc;

use http::StatusCode;

use crate::diagnostics::PhaseEvent;
use crate::error::HandlerFailure;
use crate::profile::RuntimeProfile;
use crate::request::{Request, RequestContext, Response};

/// Hook notifications from [`Application`](crate::Application).
///
/// Every method has an empty default so implementations only override what
/// they care about. Calls are made synchronously on the request path; keep
/// them cheap.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{LifecycleObserver, RequestContext, RuntimeProfile};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// #[derive(Default)]
/// struct CountingObserver {
///     started: AtomicUsize,
/// }
///
/// impl LifecycleObserver for CountingObserver {
///     fn request_started(&self, _ctx: &RequestContext) {
///         self.started.fetch_add(1, Ordering::SeqCst);
///     }
/// }
/// ```
pub trait LifecycleObserver: Send + Sync {
    /// The application finished booting.
    fn booted(&self, _profile: RuntimeProfile) {}

    /// `on_request_start` ran for this request.
    fn request_started(&self, _ctx: &RequestContext) {}

    /// The dispatcher failed; the fallback response is about to be rendered.
    fn request_failed(&self, _ctx: &RequestContext, _failure: &HandlerFailure) {}

    /// `on_request_end` ran for this request.
    fn request_finished(&self, _ctx: &RequestContext, _status: StatusCode) {}

    /// Request-scoped state was cleared. `response` is `None` when the
    /// request was abandoned before one was produced.
    fn after_request(&self, _request: &Request, _response: Option<&Response>) {}

    /// The per-request phase buffer was flushed.
    fn diagnostics_flushed(&self, _ctx: &RequestContext, _events: &[PhaseEvent]) {}

    /// The application is shutting down.
    fn terminated(&self, _profile: RuntimeProfile) {}
}

/// Fan-out over the registered observers.
#[derive(Clone, Default)]
pub(crate) struct Observers {
    observers: Vec<Arc<dyn LifecycleObserver>>,
}

impl Observers {
    pub(crate) fn add(&mut self, observer: Arc<dyn LifecycleObserver>) {
        self.observers.push(observer);
    }

    #[inline]
    pub(crate) fn len(&self) -> usize {
        self.observers.len()
    }

    pub(crate) fn booted(&self, profile: RuntimeProfile) {
        for observer in &self.observers {
            observer.booted(profile);
        }
    }

    pub(crate) fn request_started(&self, ctx: &RequestContext) {
        for observer in &self.observers {
            observer.request_started(ctx);
        }
    }

    pub(crate) fn request_failed(&self, ctx: &RequestContext, failure: &HandlerFailure) {
        for observer in &self.observers {
            observer.request_failed(ctx, failure);
        }
    }

    pub(crate) fn request_finished(&self, ctx: &RequestContext, status: StatusCode) {
        for observer in &self.observers {
            observer.request_finished(ctx, status);
        }
    }

    pub(crate) fn after_request(&self, request: &Request, response: Option<&Response>) {
        for observer in &self.observers {
            observer.after_request(request, response);
        }
    }

    pub(crate) fn diagnostics_flushed(&self, ctx: &RequestContext, events: &[PhaseEvent]) {
        for observer in &self.observers {
            observer.diagnostics_flushed(ctx, events);
        }
    }

    pub(crate) fn terminated(&self, profile: RuntimeProfile) {
        for observer in &self.observers {
            observer.terminated(profile);
        }
    }
}

/// Built-in observer that turns hook notifications into `tracing` events.
///
/// ```rust
/// use ferrous_lifecycle::{Application, RuntimeProfile, TracingObserver};
/// use std::sync::Arc;
///
/// let app = Application::builder()
///     .profile(RuntimeProfile::WorkerPoolSync)
///     .observer(Arc::new(TracingObserver::new()))
///     .build()
///     .unwrap();
/// app.boot();
/// ```
#[derive(Debug, Clone)]
pub struct TracingObserver {
    target: &'static str,
}

impl TracingObserver {
    pub fn new() -> Self {
        Self { target: "lifecycle" }
    }

    /// Tags every event with a custom `observer` field.
    pub fn with_target(target: &'static str) -> Self {
        Self { target }
    }
}

impl Default for TracingObserver {
    fn default() -> Self {
        Self::new()
    }
}

impl LifecycleObserver for TracingObserver {
    fn booted(&self, profile: RuntimeProfile) {
        tracing::info!(observer = self.target, %profile, "booted");
    }

    fn request_started(&self, ctx: &RequestContext) {
        tracing::debug!(
            observer = self.target,
            request_id = %ctx.id(),
            method = %ctx.method(),
            path = ctx.path(),
            "request started"
        );
    }

    fn request_failed(&self, ctx: &RequestContext, failure: &HandlerFailure) {
        tracing::error!(
            observer = self.target,
            request_id = %ctx.id(),
            error = %failure,
            "request failed"
        );
    }

    fn request_finished(&self, ctx: &RequestContext, status: StatusCode) {
        tracing::debug!(
            observer = self.target,
            request_id = %ctx.id(),
            status = status.as_u16(),
            duration_ms = ctx.elapsed().as_millis() as u64,
            "request finished"
        );
    }

    fn diagnostics_flushed(&self, ctx: &RequestContext, events: &[PhaseEvent]) {
        tracing::trace!(
            observer = self.target,
            request_id = %ctx.id(),
            events = events.len(),
            "diagnostics flushed"
        );
    }

    fn terminated(&self, profile: RuntimeProfile) {
        tracing::info!(observer = self.target, %profile, "terminated");
    }
}
