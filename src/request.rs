//! Canonical request and response types.
//!
//! Runtime adapters convert whatever their server hands them into these
//! types before calling [`Application::handle`](crate::Application::handle).

use std::time::{Duration, Instant};

use bytes::Bytes;
use http::{header, Method, StatusCode};
use uuid::Uuid;

/// Canonical request.
pub type Request = http::Request<Bytes>;

/// Canonical response.
pub type Response = http::Response<Bytes>;

/// Per-request diagnostics context, created in the init phase.
#[derive(Debug, Clone)]
pub struct RequestContext {
    id: Uuid,
    started_at: Instant,
    method: Method,
    path: String,
}

impl RequestContext {
    /// Assigns a fresh correlation id and starts the clock.
    pub fn new(request: &Request) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Instant::now(),
            method: request.method().clone(),
            path: request.uri().path().to_string(),
        }
    }

    /// Correlation id for logs and diagnostics.
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub fn elapsed(&self) -> Duration {
        self.started_at.elapsed()
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

/// Plain-text response with the canonical reason phrase as body.
pub fn status_response(status: StatusCode) -> Response {
    let body = status.canonical_reason().unwrap_or("Error");
    let mut response = Response::new(Bytes::from_static(body.as_bytes()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
