//! # ferrous-lifecycle
//!
//! Runtime lifecycle and request-scoped state isolation, so the same request
//! handling code runs correctly whether the process dies after every request
//! or serves thousands of them.
//!
//! ## Features
//!
//! - **Runtime profiles**: traditional, worker-pool, event-loop and coroutine
//!   execution models, detected once from environment signals
//! - **Scoped execution**: [`Container::run_scope`] overrides bindings for the
//!   length of a closure and evicts everything the closure created
//! - **Two-namespace state**: request-scoped values shadow persistent ones;
//!   the persistent namespace is bounded
//! - **Lifecycle hooks**: boot, request start/end and terminate, with worker
//!   statistics and restart signals for long-running profiles
//! - **Guaranteed shutdown**: request cleanup runs even when the dispatcher
//!   fails or panics
//!
//! ## Quick Start
//!
//! ```rust
//! use ferrous_lifecycle::{
//!     status_response, Application, Concrete, Container, Request, RuntimeProfile, StateManager,
//! };
//! use bytes::Bytes;
//! use http::StatusCode;
//! use serde_json::json;
//!
//! let app = Application::builder()
//!     .profile(RuntimeProfile::WorkerPoolSync)
//!     .on_boot(|c: &Container| c.singleton("greeting", Concrete::value(String::from("hi"))))
//!     .dispatch_fn(|container, _request| {
//!         let state = container.make_trait::<dyn StateManager>("app.state")?;
//!         state.set("user", json!("ada"));
//!         Ok(status_response(StatusCode::OK))
//!     })
//!     .build()
//!     .unwrap();
//!
//! let response = app.handle(Request::new(Bytes::new()));
//! assert_eq!(response.status(), StatusCode::OK);
//!
//! // Request-scoped state is gone once the request is over.
//! assert!(app.state().get("user").is_none());
//! ```
//!
//! ## Scoped Execution
//!
//! ```rust
//! use ferrous_lifecycle::{Concrete, Container, Overrides};
//! use std::sync::Arc;
//!
//! struct Logger(&'static str);
//!
//! let container = Container::new();
//! let l1 = Arc::new(Logger("L1"));
//! container.singleton("logger", Concrete::shared(l1.clone()));
//!
//! container.run_scope(Overrides::new().value("logger", Logger("L2")), |c| {
//!     assert_eq!(c.make_as::<Logger>("logger").unwrap().0, "L2");
//! });
//!
//! assert!(Arc::ptr_eq(&container.make_as::<Logger>("logger").unwrap(), &l1));
//! ```

pub mod application;
pub mod config;
pub mod container;
pub mod diagnostics;
pub mod error;
pub mod handler;
pub mod lifecycle;
pub mod lifetime;
pub mod observer;
pub mod profile;
pub mod request;
pub mod state;

mod internal;

pub use application::{Application, ApplicationBuilder};
pub use config::{ConfigSource, EnvironmentConfigSource, MapConfigSource, MemoryLimit, RuntimeConfig};
pub use container::{
    AnyArc, Arguments, Binding, ClassDescriptor, ClassRef, Concrete, Container, Injectable, Overrides,
    Parameter, ParameterKind, Params,
};
pub use diagnostics::{Diagnostics, Phase, PhaseEvent};
pub use error::{ConfigError, DiError, DiResult, DispatchError, HandlerFailure};
pub use handler::{
    AsyncDispatcher, DefaultExceptionHandler, Dispatcher, ExceptionHandler, FnDispatcher,
    NotFoundDispatcher, RequestHandler, RequestIdHook, ResponseHook,
};
pub use lifecycle::{
    FixedMemory, HealthStatus, LifecycleManager, MemoryProbe, ProcessMemory, RequestMetric,
    WorkerHealthWarning, WorkerStats,
};
pub use lifetime::Lifetime;
pub use observer::{LifecycleObserver, TracingObserver};
pub use profile::{detect, RuntimeProfile, Signals, UnknownProfile};
pub use request::{status_response, Request, RequestContext, Response};
pub use state::{PersistentStore, StateManager, StateManagerExt, StateStats, StatefulState, StatelessState};
