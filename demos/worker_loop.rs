//! A worker-pool style loop: one process, many sequential requests.
//!
//! Run with `RUST_LOG=debug cargo run --example worker_loop` to watch the
//! lifecycle hooks fire.

use bytes::Bytes;
use ferrous_lifecycle::{
    status_response, Application, Concrete, Container, DispatchError, Request, RequestIdHook,
    Response, RuntimeConfig, RuntimeProfile, StateManager, TracingObserver,
};
use http::StatusCode;
use serde_json::json;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// ===== Services =====

/// Shared across requests: warmed at boot.
struct ConnectionPool {
    checkouts: AtomicU64,
}

/// Built lazily per request and evicted afterwards.
struct Greeter {
    prefix: String,
}

fn dispatch(container: &Container, request: &Request) -> Result<Response, DispatchError> {
    let state = container.make_trait::<dyn StateManager>("app.state")?;
    let pool = container.make_as::<ConnectionPool>("pool")?;
    let greeter = container.make_as::<Greeter>("greeter")?;

    pool.checkouts.fetch_add(1, Ordering::Relaxed);
    let visits = state.get_persistent("visits").and_then(|v| v.as_u64()).unwrap_or(0) + 1;
    state.set_persistent("visits", json!(visits));
    state.set("path", json!(request.uri().path()));

    match request.uri().path() {
        "/boom" => Err("simulated failure".into()),
        path => {
            let mut response = status_response(StatusCode::OK);
            *response.body_mut() = Bytes::from(format!("{} {} (visit {})", greeter.prefix, path, visits));
            Ok(response)
        }
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = RuntimeConfig {
        max_requests: 5,
        warm: vec!["pool".to_string()],
        ..RuntimeConfig::default()
    };

    let app = Application::builder()
        .profile(RuntimeProfile::WorkerPoolSync)
        .config(config)
        .observer(Arc::new(TracingObserver::new()))
        .response_hook(Arc::new(RequestIdHook))
        .on_boot(|container: &Container| {
            container.singleton("pool", Concrete::factory(|_| ConnectionPool { checkouts: AtomicU64::new(0) }));
            container.singleton("greeter", Concrete::factory(|_| Greeter { prefix: "hello from".into() }));
        })
        .dispatch_fn(dispatch)
        .build()?;

    for path in ["/", "/users", "/boom", "/users/1", "/health", "/"] {
        let request = http::Request::builder().uri(path).body(Bytes::new())?;
        let response = app.handle(request);
        println!(
            "{:>10} -> {} {}",
            path,
            response.status(),
            String::from_utf8_lossy(response.body())
        );

        let health = app.lifecycle().health();
        if health.should_restart {
            for warning in &health.warnings {
                println!("supervisor notice: {}", warning);
            }
        }
    }

    let pool = app.container().make_as::<ConnectionPool>("pool")?;
    let stats = app.lifecycle().worker_stats();
    println!(
        "served {} requests, {} pool checkouts, avg {:?}",
        stats.requests_handled,
        pool.checkouts.load(Ordering::Relaxed),
        stats.average_request_time
    );

    app.terminate();
    Ok(())
}
