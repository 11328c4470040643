use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{HealthStatus, MemoryProbe, RequestMetric, WorkerHealthWarning, WorkerStats};
use crate::config::{MemoryLimit, RuntimeConfig};
use crate::request::{RequestContext, Response};

#[derive(Debug, Default)]
struct Counters {
    booted_at: Option<Instant>,
    // 80% of the memory limit, fixed at boot
    threshold: Option<u64>,
    requests_handled: u64,
    memory_peak: u64,
    peak_in_flight: usize,
    recent: VecDeque<RequestMetric>,
    health: HealthStatus,
}

/// Bookkeeping shared by the long-running lifecycle variants.
pub(crate) struct WorkerCore {
    kind: &'static str,
    max_requests: u64,
    memory_limit: MemoryLimit,
    window: usize,
    probe: Arc<dyn MemoryProbe>,
    booted: AtomicBool,
    terminated: AtomicBool,
    in_flight: AtomicUsize,
    counters: Mutex<Counters>,
}

impl WorkerCore {
    pub(crate) fn new(kind: &'static str, config: &RuntimeConfig, probe: Arc<dyn MemoryProbe>) -> Self {
        Self {
            kind,
            max_requests: config.max_requests,
            memory_limit: config.memory_limit,
            window: config.metrics_window.max(1),
            probe,
            booted: AtomicBool::new(false),
            terminated: AtomicBool::new(false),
            in_flight: AtomicUsize::new(0),
            counters: Mutex::new(Counters::default()),
        }
    }

    /// Returns `false` when the worker was already booted.
    pub(crate) fn boot(&self) -> bool {
        if self.booted.swap(true, Ordering::SeqCst) {
            return false;
        }
        let memory = self.probe.current();
        let mut counters = self.counters.lock();
        counters.booted_at = Some(Instant::now());
        counters.threshold = self.memory_limit.threshold();
        counters.memory_peak = memory;
        tracing::info!(
            lifecycle = self.kind,
            max_requests = self.max_requests,
            memory_limit = %self.memory_limit,
            memory,
            "worker booted"
        );
        true
    }

    pub(crate) fn is_booted(&self) -> bool {
        self.booted.load(Ordering::SeqCst)
    }

    /// Counts the request, runs the health checks and returns how many
    /// requests are in flight including this one.
    pub(crate) fn request_started(&self, ctx: &RequestContext) -> usize {
        let in_flight = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        let memory = self.probe.current();

        let mut counters = self.counters.lock();
        counters.requests_handled += 1;
        counters.memory_peak = counters.memory_peak.max(memory);
        counters.peak_in_flight = counters.peak_in_flight.max(in_flight);

        let mut warnings = Vec::new();
        if let Some(threshold) = counters.threshold {
            if memory > threshold {
                warnings.push(WorkerHealthWarning::MemoryThresholdExceeded {
                    current: memory,
                    threshold,
                });
            }
        }
        if counters.requests_handled >= self.max_requests {
            warnings.push(WorkerHealthWarning::MaxRequestsReached {
                handled: counters.requests_handled,
                max: self.max_requests,
            });
        }
        for warning in &warnings {
            tracing::warn!(
                lifecycle = self.kind,
                request_id = %ctx.id(),
                %warning,
                "worker health warning"
            );
        }
        counters.health = HealthStatus {
            should_restart: !warnings.is_empty(),
            warnings,
        };

        tracing::debug!(
            lifecycle = self.kind,
            request_id = %ctx.id(),
            method = %ctx.method(),
            path = ctx.path(),
            request = counters.requests_handled,
            in_flight,
            "request started"
        );
        in_flight
    }

    pub(crate) fn request_finished(&self, ctx: &RequestContext, response: &Response) {
        self.release_slot();
        let memory = self.probe.current();
        let metric = RequestMetric {
            request_id: ctx.id(),
            duration: ctx.elapsed(),
            memory,
            status: response.status().as_u16(),
        };

        let mut counters = self.counters.lock();
        counters.memory_peak = counters.memory_peak.max(memory);
        if counters.recent.len() >= self.window {
            counters.recent.pop_front();
        }
        tracing::debug!(
            lifecycle = self.kind,
            request_id = %ctx.id(),
            status = metric.status,
            duration_ms = metric.duration.as_millis() as u64,
            "request finished"
        );
        counters.recent.push_back(metric);
    }

    /// Frees the in-flight slot of a request that never produced a response.
    /// No metric is recorded for it.
    pub(crate) fn request_abandoned(&self, ctx: &RequestContext) {
        self.release_slot();
        tracing::debug!(
            lifecycle = self.kind,
            request_id = %ctx.id(),
            duration_ms = ctx.elapsed().as_millis() as u64,
            "request abandoned"
        );
    }

    fn release_slot(&self) {
        let _ = self
            .in_flight
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
    }

    /// Returns `false` when the worker was already terminated.
    pub(crate) fn terminate(&self) -> bool {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return false;
        }
        let stats = self.stats();
        tracing::info!(
            lifecycle = self.kind,
            requests_handled = stats.requests_handled,
            memory_peak = stats.memory_peak,
            uptime_secs = stats.uptime.as_secs(),
            "worker terminating"
        );
        true
    }

    pub(crate) fn stats(&self) -> WorkerStats {
        let memory_usage = self.probe.current();
        let counters = self.counters.lock();
        let average_request_time = if counters.recent.is_empty() {
            Duration::ZERO
        } else {
            let total: Duration = counters.recent.iter().map(|m| m.duration).sum();
            total / counters.recent.len() as u32
        };
        WorkerStats {
            uptime: counters.booted_at.map(|t| t.elapsed()).unwrap_or_default(),
            requests_handled: counters.requests_handled,
            memory_usage,
            memory_peak: counters.memory_peak.max(memory_usage),
            average_request_time,
            in_flight: self.in_flight.load(Ordering::SeqCst),
            peak_in_flight: counters.peak_in_flight,
        }
    }

    pub(crate) fn health(&self) -> HealthStatus {
        self.counters.lock().health.clone()
    }

    pub(crate) fn recent(&self) -> Vec<RequestMetric> {
        self.counters.lock().recent.iter().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::FixedMemory;
    use crate::request::{status_response, Request};
    use bytes::Bytes;
    use http::StatusCode;

    fn core(window: usize) -> WorkerCore {
        let config = RuntimeConfig {
            metrics_window: window,
            ..RuntimeConfig::default()
        };
        WorkerCore::new("test", &config, Arc::new(FixedMemory::new(0)))
    }

    fn run_one(core: &WorkerCore) -> RequestContext {
        let request = Request::new(Bytes::new());
        let ctx = RequestContext::new(&request);
        core.request_started(&ctx);
        core.request_finished(&ctx, &status_response(StatusCode::OK));
        ctx
    }

    #[test]
    fn ring_buffer_keeps_latest_window() {
        let core = core(3);
        core.boot();
        let ids: Vec<_> = (0..5).map(|_| run_one(&core).id()).collect();

        let recent: Vec<_> = core.recent().into_iter().map(|m| m.request_id).collect();
        assert_eq!(recent, ids[2..].to_vec());
        assert_eq!(core.stats().requests_handled, 5);
    }

    #[test]
    fn in_flight_returns_to_zero() {
        let core = core(10);
        core.boot();
        let request = Request::new(Bytes::new());
        let a = RequestContext::new(&request);
        let b = RequestContext::new(&request);
        assert_eq!(core.request_started(&a), 1);
        assert_eq!(core.request_started(&b), 2);
        core.request_finished(&a, &status_response(StatusCode::OK));
        core.request_finished(&b, &status_response(StatusCode::OK));

        let stats = core.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.peak_in_flight, 2);
    }

    #[test]
    fn abandoned_request_frees_its_slot_without_a_metric() {
        let core = core(10);
        core.boot();
        let request = Request::new(Bytes::new());
        let ctx = RequestContext::new(&request);
        assert_eq!(core.request_started(&ctx), 1);
        core.request_abandoned(&ctx);

        let stats = core.stats();
        assert_eq!(stats.in_flight, 0);
        assert_eq!(stats.requests_handled, 1);
        assert!(core.recent().is_empty());

        assert_eq!(core.request_started(&RequestContext::new(&request)), 1);
    }

    #[test]
    fn boot_and_terminate_run_once() {
        let core = core(10);
        assert!(core.boot());
        assert!(!core.boot());
        assert!(core.terminate());
        assert!(!core.terminate());
    }
}
