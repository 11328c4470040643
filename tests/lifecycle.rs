use bytes::Bytes;
use ferrous_lifecycle::lifecycle::{self, TraditionalLifecycle};
use ferrous_lifecycle::{
    status_response, FixedMemory, LifecycleManager, MemoryLimit, Request, RequestContext,
    RuntimeConfig, RuntimeProfile, WorkerHealthWarning,
};
use http::StatusCode;
use std::sync::Arc;

const MB: u64 = 1024 * 1024;

fn config(max_requests: u64, memory: &str) -> RuntimeConfig {
    RuntimeConfig {
        max_requests,
        memory_limit: memory.parse().unwrap(),
        ..RuntimeConfig::default()
    }
}

fn serve(manager: &dyn LifecycleManager, status: StatusCode) -> RequestContext {
    let request = Request::new(Bytes::new());
    let ctx = RequestContext::new(&request);
    manager.on_request_start(&ctx, &request);
    manager.on_request_end(&ctx, &request, &status_response(status));
    ctx
}

#[test]
fn test_lifecycle_types() {
    let probe = Arc::new(FixedMemory::new(0));
    let expected = [
        (RuntimeProfile::Traditional, "traditional", false),
        (RuntimeProfile::WorkerPoolSync, "worker-pool", true),
        (RuntimeProfile::EventLoop, "event-loop", true),
        (RuntimeProfile::CoroutineWorker, "coroutine", true),
    ];
    for (profile, name, long_running) in expected {
        let manager = lifecycle::for_profile(profile, &RuntimeConfig::default(), probe.clone());
        assert_eq!(manager.lifecycle_type(), name);
        assert_eq!(manager.is_long_running(), long_running);
        assert_eq!(manager.is_long_running(), profile.is_long_running());
    }
}

#[test]
fn test_boot_is_idempotent() {
    let probe = Arc::new(FixedMemory::new(10 * MB));
    let manager = lifecycle::for_profile(RuntimeProfile::WorkerPoolSync, &config(10, "128M"), probe.clone());
    assert!(!manager.is_booted());

    manager.on_boot();
    serve(&*manager, StatusCode::OK);
    manager.on_boot();

    assert!(manager.is_booted());
    assert_eq!(manager.worker_stats().requests_handled, 1);
}

#[test]
fn test_memory_threshold_warning() {
    let probe = Arc::new(FixedMemory::new(50 * MB));
    let manager = lifecycle::for_profile(RuntimeProfile::EventLoop, &config(1000, "100M"), probe.clone());
    manager.on_boot();

    serve(&*manager, StatusCode::OK);
    assert!(manager.health().warnings.is_empty());
    assert!(!manager.health().should_restart);

    // Threshold is 80% of 100M.
    probe.set(81 * MB);
    serve(&*manager, StatusCode::OK);

    let health = manager.health();
    assert!(health.should_restart);
    assert_eq!(
        health.warnings,
        vec![WorkerHealthWarning::MemoryThresholdExceeded { current: 81 * MB, threshold: 80 * MB }]
    );
    assert_eq!(manager.worker_stats().memory_peak, 81 * MB);
}

#[test]
fn test_unlimited_memory_never_warns() {
    let probe = Arc::new(FixedMemory::new(u64::MAX / 2));
    let manager = lifecycle::for_profile(RuntimeProfile::CoroutineWorker, &config(1000, "-1"), probe);
    manager.on_boot();
    serve(&*manager, StatusCode::OK);
    assert!(manager.health().warnings.is_empty());
}

#[test]
fn test_max_requests_signals_restart() {
    let probe = Arc::new(FixedMemory::new(0));
    let manager = lifecycle::for_profile(RuntimeProfile::WorkerPoolSync, &config(3, "128M"), probe);
    manager.on_boot();

    serve(&*manager, StatusCode::OK);
    serve(&*manager, StatusCode::OK);
    assert!(!manager.health().should_restart);

    serve(&*manager, StatusCode::OK);
    let health = manager.health();
    assert!(health.should_restart);
    assert_eq!(health.warnings, vec![WorkerHealthWarning::MaxRequestsReached { handled: 3, max: 3 }]);

    // Signal only: the worker keeps serving.
    serve(&*manager, StatusCode::OK);
    assert_eq!(manager.worker_stats().requests_handled, 4);
}

#[test]
fn test_metrics_window_is_bounded() {
    let probe = Arc::new(FixedMemory::new(0));
    let config = RuntimeConfig { metrics_window: 5, ..RuntimeConfig::default() };
    let manager = lifecycle::for_profile(RuntimeProfile::WorkerPoolSync, &config, probe);
    manager.on_boot();

    let mut last = Vec::new();
    for i in 0..12 {
        let status = if i % 2 == 0 { StatusCode::OK } else { StatusCode::NOT_FOUND };
        last.push(serve(&*manager, status).id());
    }

    let recent = manager.recent_requests();
    assert_eq!(recent.len(), 5);
    let ids: Vec<_> = recent.iter().map(|m| m.request_id).collect();
    assert_eq!(ids, last[7..].to_vec());
    assert_eq!(recent.last().map(|m| m.status), Some(404));
    assert_eq!(manager.worker_stats().requests_handled, 12);
}

#[test]
fn test_concurrent_in_flight_accounting() {
    let probe = Arc::new(FixedMemory::new(0));
    let manager = lifecycle::for_profile(RuntimeProfile::CoroutineWorker, &RuntimeConfig::default(), probe);
    manager.on_boot();

    let request = Request::new(Bytes::new());
    let contexts: Vec<_> = (0..4).map(|_| RequestContext::new(&request)).collect();
    for ctx in &contexts {
        manager.on_request_start(ctx, &request);
    }
    assert_eq!(manager.worker_stats().in_flight, 4);

    for ctx in &contexts {
        manager.on_request_end(ctx, &request, &status_response(StatusCode::OK));
    }
    let stats = manager.worker_stats();
    assert_eq!(stats.in_flight, 0);
    assert_eq!(stats.peak_in_flight, 4);
}

#[test]
fn test_traditional_terminates_every_call() {
    let manager = TraditionalLifecycle::new(Arc::new(FixedMemory::new(0)));
    manager.on_boot();
    serve(&manager, StatusCode::OK);
    manager.on_terminate();
    manager.on_terminate();

    assert_eq!(manager.terminations(), 2);
    assert!(manager.recent_requests().is_empty());
    assert!(!manager.health().should_restart);
    assert_eq!(manager.worker_stats().requests_handled, 1);
}

#[test]
fn test_memory_limit_threshold_math() {
    let limit: MemoryLimit = "256M".parse().unwrap();
    assert_eq!(limit.threshold(), Some(256 * MB * 8 / 10));
    assert_eq!(MemoryLimit::Unlimited.threshold(), None);
}
