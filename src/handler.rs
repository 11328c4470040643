//! Request orchestration.
//!
//! [`RequestHandler`] drives one request through its phases:
//!
//! 1. **init**: a fresh correlation id, then `on_request_start`;
//! 2. **execute**: the external [`Dispatcher`] produces a response;
//! 3. **respond**: every [`ResponseHook`] post-processes it;
//! 4. **shutdown**: `on_request_end`, diagnostics flush and `after_request`.
//!
//! Failures in phases 1 to 3, whether an `Err` from the dispatcher or a panic,
//! are reported to the [`ExceptionHandler`] and rendered as a fallback
//! response. Shutdown lives in a drop guard, so it also runs when an async
//! request future is dropped before it completes; `on_request_end` is skipped
//! in that case because no response exists.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use http::header::HeaderValue;
use http::StatusCode;

use crate::container::Container;
use crate::diagnostics::{Diagnostics, Phase};
use crate::error::{DispatchError, HandlerFailure};
use crate::lifecycle::LifecycleManager;
use crate::observer::Observers;
use crate::request::{status_response, Request, RequestContext, Response};

/// Header carrying the correlation id on fallback responses and, when
/// [`RequestIdHook`] is installed, on every response.
pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// The business dispatcher (usually a router) behind the handler.
pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, container: &Container, request: &Request) -> Result<Response, DispatchError>;
}

/// Async counterpart of [`Dispatcher`] for event-loop and coroutine adapters.
#[async_trait]
pub trait AsyncDispatcher: Send + Sync {
    async fn dispatch(&self, container: &Container, request: &Request) -> Result<Response, DispatchError>;
}

/// Adapts a closure into a [`Dispatcher`].
pub struct FnDispatcher<F>(pub F);

impl<F> FnDispatcher<F>
where
    F: Fn(&Container, &Request) -> Result<Response, DispatchError> + Send + Sync,
{
    pub fn new(dispatch: F) -> Self {
        Self(dispatch)
    }
}

impl<F> Dispatcher for FnDispatcher<F>
where
    F: Fn(&Container, &Request) -> Result<Response, DispatchError> + Send + Sync,
{
    fn dispatch(&self, container: &Container, request: &Request) -> Result<Response, DispatchError> {
        (self.0)(container, request)
    }
}

/// Answers every request with `404 Not Found`.
#[derive(Debug, Default, Clone, Copy)]
pub struct NotFoundDispatcher;

impl Dispatcher for NotFoundDispatcher {
    fn dispatch(&self, _container: &Container, _request: &Request) -> Result<Response, DispatchError> {
        Ok(status_response(StatusCode::NOT_FOUND))
    }
}

/// Reports caught request failures and renders the fallback response.
pub trait ExceptionHandler: Send + Sync {
    fn report(&self, ctx: &RequestContext, failure: &HandlerFailure);

    fn render(&self, ctx: &RequestContext, failure: &HandlerFailure) -> Response;
}

/// Logs the failure at `error` and renders a plain `500 Internal Server Error`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultExceptionHandler;

impl ExceptionHandler for DefaultExceptionHandler {
    fn report(&self, ctx: &RequestContext, failure: &HandlerFailure) {
        tracing::error!(
            request_id = %ctx.id(),
            method = %ctx.method(),
            path = ctx.path(),
            error = %failure,
            "request failed"
        );
    }

    fn render(&self, ctx: &RequestContext, _failure: &HandlerFailure) -> Response {
        fallback_response(ctx)
    }
}

fn fallback_response(ctx: &RequestContext) -> Response {
    let mut response = status_response(StatusCode::INTERNAL_SERVER_ERROR);
    set_request_id(ctx, &mut response);
    response
}

fn set_request_id(ctx: &RequestContext, response: &mut Response) {
    if let Ok(value) = HeaderValue::from_str(&ctx.id().to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
}

/// Post-processing applied to every successful response in the respond phase.
pub trait ResponseHook: Send + Sync {
    fn on_response(&self, ctx: &RequestContext, response: &mut Response);
}

/// Stamps the correlation id onto the response.
#[derive(Debug, Default, Clone, Copy)]
pub struct RequestIdHook;

impl ResponseHook for RequestIdHook {
    fn on_response(&self, ctx: &RequestContext, response: &mut Response) {
        set_request_id(ctx, response);
    }
}

/// Runs the request phases against one lifecycle manager.
#[derive(Clone)]
pub struct RequestHandler {
    lifecycle: Arc<dyn LifecycleManager>,
    exceptions: Arc<dyn ExceptionHandler>,
    hooks: Vec<Arc<dyn ResponseHook>>,
    observers: Observers,
}

impl RequestHandler {
    pub fn new(lifecycle: Arc<dyn LifecycleManager>) -> Self {
        Self {
            lifecycle,
            exceptions: Arc::new(DefaultExceptionHandler),
            hooks: Vec::new(),
            observers: Observers::default(),
        }
    }

    pub fn with_exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exceptions = handler;
        self
    }

    pub fn with_response_hook(mut self, hook: Arc<dyn ResponseHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub(crate) fn with_observers(mut self, observers: Observers) -> Self {
        self.observers = observers;
        self
    }

    pub fn lifecycle(&self) -> &Arc<dyn LifecycleManager> {
        &self.lifecycle
    }

    /// Handles one request synchronously.
    ///
    /// `after_request` receives the response when one was produced and runs
    /// exactly once, last.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_lifecycle::{
    ///     lifecycle, Container, FixedMemory, FnDispatcher, Request, RequestHandler,
    ///     RuntimeConfig, RuntimeProfile,
    /// };
    /// use bytes::Bytes;
    /// use std::sync::Arc;
    ///
    /// let manager = lifecycle::for_profile(
    ///     RuntimeProfile::WorkerPoolSync,
    ///     &RuntimeConfig::default(),
    ///     Arc::new(FixedMemory::new(0)),
    /// );
    /// manager.on_boot();
    /// let handler = RequestHandler::new(manager);
    /// let dispatcher = FnDispatcher::new(|_, _| Err("no route".into()));
    ///
    /// let response = handler.handle(&Container::new(), &dispatcher, &Request::new(Bytes::new()), |_, _| {});
    /// assert_eq!(response.status(), 500);
    /// ```
    pub fn handle<D, A>(&self, container: &Container, dispatcher: &D, request: &Request, after_request: A) -> Response
    where
        D: Dispatcher + ?Sized,
        A: FnOnce(&Request, Option<&Response>),
    {
        let ctx = RequestContext::new(request);
        let mut shutdown = Shutdown::new(self, &ctx, request, after_request);

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.init(&ctx, request, &mut shutdown);
            shutdown.diagnostics.record(Phase::Execute);
            let response = dispatcher
                .dispatch(container, request)
                .map_err(HandlerFailure::Dispatch)?;
            Ok::<Response, HandlerFailure>(self.respond(&ctx, response, &mut shutdown.diagnostics))
        }));

        let response = self.settle(&ctx, outcome, &mut shutdown.diagnostics);
        shutdown.finish(response)
    }

    /// Handles one request through an [`AsyncDispatcher`].
    pub async fn handle_async<D, A>(
        &self,
        container: &Container,
        dispatcher: &D,
        request: &Request,
        after_request: A,
    ) -> Response
    where
        D: AsyncDispatcher + ?Sized,
        A: FnOnce(&Request, Option<&Response>),
    {
        let ctx = RequestContext::new(request);
        let mut shutdown = Shutdown::new(self, &ctx, request, after_request);

        let outcome = AssertUnwindSafe(async {
            self.init(&ctx, request, &mut shutdown);
            shutdown.diagnostics.record(Phase::Execute);
            let response = dispatcher
                .dispatch(container, request)
                .await
                .map_err(HandlerFailure::Dispatch)?;
            Ok::<Response, HandlerFailure>(self.respond(&ctx, response, &mut shutdown.diagnostics))
        })
        .catch_unwind()
        .await;

        let response = self.settle(&ctx, outcome, &mut shutdown.diagnostics);
        shutdown.finish(response)
    }

    fn init<A>(&self, ctx: &RequestContext, request: &Request, shutdown: &mut Shutdown<'_, A>)
    where
        A: FnOnce(&Request, Option<&Response>),
    {
        shutdown.diagnostics.record(Phase::Init);
        self.lifecycle.on_request_start(ctx, request);
        shutdown.started = true;
        self.observers.request_started(ctx);
    }

    fn respond(&self, ctx: &RequestContext, mut response: Response, diagnostics: &mut Diagnostics) -> Response {
        diagnostics.record(Phase::Respond);
        for hook in &self.hooks {
            hook.on_response(ctx, &mut response);
        }
        response
    }

    /// Turns the outcome of phases 1 to 3 into the response to send.
    fn settle(
        &self,
        ctx: &RequestContext,
        outcome: std::thread::Result<Result<Response, HandlerFailure>>,
        diagnostics: &mut Diagnostics,
    ) -> Response {
        let failure = match outcome {
            Ok(Ok(response)) => return response,
            Ok(Err(failure)) => failure,
            Err(payload) => HandlerFailure::from_panic(payload),
        };
        diagnostics.record_with(Phase::Error, failure.to_string());
        self.observers.request_failed(ctx, &failure);

        let exceptions = &self.exceptions;
        let rendered = panic::catch_unwind(AssertUnwindSafe(|| {
            exceptions.report(ctx, &failure);
            exceptions.render(ctx, &failure)
        }));
        match rendered {
            Ok(response) => response,
            Err(_) => {
                tracing::error!(request_id = %ctx.id(), "exception handler panicked");
                fallback_response(ctx)
            }
        }
    }
}

/// Phase 4, run exactly once by [`finish`](Self::finish) or on drop.
struct Shutdown<'a, A>
where
    A: FnOnce(&Request, Option<&Response>),
{
    handler: &'a RequestHandler,
    ctx: &'a RequestContext,
    request: &'a Request,
    diagnostics: Diagnostics,
    started: bool,
    after_request: Option<A>,
}

impl<'a, A> Shutdown<'a, A>
where
    A: FnOnce(&Request, Option<&Response>),
{
    fn new(handler: &'a RequestHandler, ctx: &'a RequestContext, request: &'a Request, after_request: A) -> Self {
        Self {
            handler,
            ctx,
            request,
            diagnostics: Diagnostics::new(ctx),
            started: false,
            after_request: Some(after_request),
        }
    }

    fn finish(mut self, response: Response) -> Response {
        self.run(Some(&response));
        response
    }

    fn run(&mut self, response: Option<&Response>) {
        let Some(after_request) = self.after_request.take() else {
            return;
        };
        let handler = self.handler;
        match (self.started, response) {
            (true, Some(response)) => {
                handler.lifecycle.on_request_end(self.ctx, self.request, response);
                handler.observers.request_finished(self.ctx, response.status());
            }
            (true, None) => handler.lifecycle.on_request_abandoned(self.ctx, self.request),
            (false, _) => {}
        }
        let events = self.diagnostics.flush();
        handler.observers.diagnostics_flushed(self.ctx, &events);
        after_request(self.request, response);
    }
}

impl<A> Drop for Shutdown<'_, A>
where
    A: FnOnce(&Request, Option<&Response>),
{
    fn drop(&mut self) {
        if self.after_request.is_some() {
            tracing::debug!(request_id = %self.ctx.id(), "request abandoned before a response was produced");
            self.run(None);
        }
    }
}
