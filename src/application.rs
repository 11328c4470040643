//! Composition root.
//!
//! [`Application`] owns the process-wide pieces: the detected
//! [`RuntimeProfile`], the root [`Container`], the [`StateManager`], the
//! persistent store and the [`LifecycleManager`]. Runtime adapters call
//! [`Application::handle`] (or [`Application::handle_async`]) for every
//! request and [`Application::terminate`] when the process shuts down.
//!
//! Request isolation depends on the profile. Sequential profiles run each
//! request inside [`Container::run_scope`] on the root container. Concurrent
//! profiles, and every async request, get a [`Container::child`] view that is
//! dropped with the request, so interleaved requests never share overrides.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, Once};

use crate::config::RuntimeConfig;
use crate::container::{Concrete, Container, Overrides};
use crate::error::{ConfigError, DispatchError};
use crate::handler::{
    AsyncDispatcher, Dispatcher, ExceptionHandler, FnDispatcher, NotFoundDispatcher, RequestHandler,
    ResponseHook,
};
use crate::lifecycle::{self, LifecycleManager, MemoryProbe, ProcessMemory};
use crate::observer::{LifecycleObserver, Observers};
use crate::profile::{self, RuntimeProfile, Signals};
use crate::request::{Request, Response};
use crate::state::{self, PersistentStore, StateManager};

/// Abstract under which the active [`StateManager`] is registered.
pub const STATE: &str = "app.state";
/// Abstract under which the active [`LifecycleManager`] is registered.
pub const LIFECYCLE: &str = "app.lifecycle";
/// Abstract under which the [`RuntimeConfig`] is registered.
pub const CONFIG: &str = "app.config";
/// Abstract under which the [`RuntimeProfile`] is registered.
pub const PROFILE: &str = "app.profile";
/// Abstract under which the current [`Request`] is visible while it is handled.
pub const REQUEST: &str = "request";

type BootCallback = Box<dyn FnOnce(&Container) + Send>;

/// Builder for [`Application`].
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Application, Concrete, Container, RuntimeProfile};
///
/// let app = Application::builder()
///     .profile(RuntimeProfile::WorkerPoolSync)
///     .on_boot(|container: &Container| {
///         container.singleton("greeting", Concrete::value(String::from("hello")));
///     })
///     .build()
///     .unwrap();
///
/// app.boot();
/// let greeting = app.container().make_as::<String>("greeting").unwrap();
/// assert_eq!(greeting.as_str(), "hello");
/// ```
pub struct ApplicationBuilder {
    profile: Option<RuntimeProfile>,
    signals: Option<Signals>,
    config: RuntimeConfig,
    probe: Option<Arc<dyn MemoryProbe>>,
    container: Option<Container>,
    store: Option<Arc<PersistentStore>>,
    dispatcher: Arc<dyn Dispatcher>,
    async_dispatcher: Option<Arc<dyn AsyncDispatcher>>,
    exceptions: Option<Arc<dyn ExceptionHandler>>,
    hooks: Vec<Arc<dyn ResponseHook>>,
    observers: Observers,
    boot_callbacks: Vec<BootCallback>,
}

impl Default for ApplicationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ApplicationBuilder {
    pub fn new() -> Self {
        Self {
            profile: None,
            signals: None,
            config: RuntimeConfig::default(),
            probe: None,
            container: None,
            store: None,
            dispatcher: Arc::new(NotFoundDispatcher),
            async_dispatcher: None,
            exceptions: None,
            hooks: Vec::new(),
            observers: Observers::default(),
            boot_callbacks: Vec::new(),
        }
    }

    /// Forces a profile instead of detecting one.
    pub fn profile(mut self, profile: RuntimeProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Detects the profile from these signals instead of the live process.
    pub fn signals(mut self, signals: Signals) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn config(mut self, config: RuntimeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Uses an existing root container.
    pub fn container(mut self, container: Container) -> Self {
        self.container = Some(container);
        self
    }

    /// Shares a persistent store, e.g. one a test wants to inspect.
    pub fn persistent_store(mut self, store: Arc<PersistentStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = dispatcher;
        self
    }

    /// Dispatches through a closure.
    pub fn dispatch_fn<F>(self, dispatch: F) -> Self
    where
        F: Fn(&Container, &Request) -> Result<Response, DispatchError> + Send + Sync + 'static,
    {
        self.dispatcher(Arc::new(FnDispatcher::new(dispatch)))
    }

    /// Dispatcher used by [`Application::handle_async`]. Without one, async
    /// requests go through the sync dispatcher.
    pub fn async_dispatcher(mut self, dispatcher: Arc<dyn AsyncDispatcher>) -> Self {
        self.async_dispatcher = Some(dispatcher);
        self
    }

    pub fn exception_handler(mut self, handler: Arc<dyn ExceptionHandler>) -> Self {
        self.exceptions = Some(handler);
        self
    }

    pub fn response_hook(mut self, hook: Arc<dyn ResponseHook>) -> Self {
        self.hooks.push(hook);
        self
    }

    pub fn observer(mut self, observer: Arc<dyn LifecycleObserver>) -> Self {
        self.observers.add(observer);
        self
    }

    /// Registers a callback run once, during boot, before warm services are
    /// resolved.
    pub fn on_boot<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(&Container) + Send + 'static,
    {
        self.boot_callbacks.push(Box::new(callback));
        self
    }

    pub fn build(self) -> Result<Application, ConfigError> {
        self.config.validate()?;

        let profile = match (self.profile, &self.signals) {
            (Some(profile), _) => profile,
            (None, Some(signals)) => profile::detect(signals),
            (None, None) => RuntimeProfile::detect(),
        };
        let probe = self
            .probe
            .unwrap_or_else(|| Arc::new(ProcessMemory::new()) as Arc<dyn MemoryProbe>);
        let store = self.store.unwrap_or_else(|| {
            Arc::new(PersistentStore::with_limits(
                self.config.persistent_ceiling,
                self.config.persistent_watermark,
            ))
        });
        let state = state::for_profile(profile, store.clone());
        let lifecycle = lifecycle::for_profile(profile, &self.config, probe);

        let mut handler = RequestHandler::new(lifecycle.clone()).with_observers(self.observers.clone());
        if let Some(exceptions) = self.exceptions {
            handler = handler.with_exception_handler(exceptions);
        }
        for hook in self.hooks {
            handler = handler.with_response_hook(hook);
        }

        tracing::info!(
            %profile,
            long_running = profile.is_long_running(),
            concurrent = profile.is_concurrent(),
            "application configured"
        );

        Ok(Application {
            profile,
            config: self.config,
            container: self.container.unwrap_or_default(),
            state,
            store,
            lifecycle,
            handler,
            dispatcher: self.dispatcher,
            async_dispatcher: self.async_dispatcher,
            observers: self.observers,
            boot: Once::new(),
            boot_callbacks: Mutex::new(self.boot_callbacks),
            terminated: AtomicBool::new(false),
        })
    }
}

/// Process-wide composition root and single request entry point.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{status_response, Application, Request, RuntimeProfile};
/// use bytes::Bytes;
/// use http::StatusCode;
///
/// let app = Application::builder()
///     .profile(RuntimeProfile::WorkerPoolSync)
///     .dispatch_fn(|_, _| Ok(status_response(StatusCode::OK)))
///     .build()
///     .unwrap();
///
/// let response = app.handle(Request::new(Bytes::new()));
/// assert_eq!(response.status(), StatusCode::OK);
/// assert_eq!(app.lifecycle().worker_stats().requests_handled, 1);
/// ```
pub struct Application {
    profile: RuntimeProfile,
    config: RuntimeConfig,
    container: Container,
    state: Arc<dyn StateManager>,
    store: Arc<PersistentStore>,
    lifecycle: Arc<dyn LifecycleManager>,
    handler: RequestHandler,
    dispatcher: Arc<dyn Dispatcher>,
    async_dispatcher: Option<Arc<dyn AsyncDispatcher>>,
    observers: Observers,
    boot: Once,
    boot_callbacks: Mutex<Vec<BootCallback>>,
    terminated: AtomicBool,
}

impl Application {
    pub fn builder() -> ApplicationBuilder {
        ApplicationBuilder::new()
    }

    /// Application for the profile detected from the live process, configured
    /// from `APP_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::builder().config(RuntimeConfig::from_env()?).build()
    }

    pub fn profile(&self) -> RuntimeProfile {
        self.profile
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The root container.
    pub fn container(&self) -> &Container {
        &self.container
    }

    pub fn state(&self) -> &Arc<dyn StateManager> {
        &self.state
    }

    pub fn persistent_store(&self) -> &Arc<PersistentStore> {
        &self.store
    }

    pub fn lifecycle(&self) -> &Arc<dyn LifecycleManager> {
        &self.lifecycle
    }

    pub fn handler(&self) -> &RequestHandler {
        &self.handler
    }

    pub fn is_booted(&self) -> bool {
        self.boot.state().done()
    }

    /// Boots the process once; later calls return immediately.
    ///
    /// Registers the core services, runs the `on_boot` callbacks, resolves the
    /// configured warm services and fires `on_boot`.
    pub fn boot(&self) {
        self.boot.call_once(|| {
            self.register_core_services();

            let callbacks = std::mem::take(&mut *self.boot_callbacks.lock());
            for callback in callbacks {
                callback(&self.container);
            }

            for name in &self.config.warm {
                match self.container.make(name) {
                    Ok(_) => tracing::debug!(service = %name, "warmed"),
                    Err(err) => tracing::warn!(service = %name, error = %err, "warm-up failed"),
                }
            }

            self.lifecycle.on_boot();
            self.observers.booted(self.profile);
            tracing::info!(profile = %self.profile, "application booted");
        });
    }

    fn register_core_services(&self) {
        let container = &self.container;
        container.singleton(STATE, Concrete::trait_object(self.state.clone()));
        container.singleton(LIFECYCLE, Concrete::trait_object(self.lifecycle.clone()));
        container.instance(CONFIG, Arc::new(self.config.clone()));
        container.instance(PROFILE, Arc::new(self.profile));
    }

    /// Handles one request through the sync dispatcher.
    pub fn handle(&self, request: Request) -> Response {
        self.boot();
        let request = Arc::new(request);

        if self.profile.is_concurrent() {
            let view = self.container.child();
            view.instance(REQUEST, request.clone());
            return self.handler.handle(&view, &*self.dispatcher, &request, |req, resp| {
                self.finish_request(&view, req, resp)
            });
        }

        let overrides = Overrides::new().shared(REQUEST, request.clone());
        self.container.run_scope(overrides, |scoped| {
            self.handler.handle(scoped, &*self.dispatcher, &request, |req, resp| {
                self.finish_request(scoped, req, resp)
            })
        })
    }

    /// Handles one request through the async dispatcher (or the sync one when
    /// none was configured). Always runs in a child container view.
    pub async fn handle_async(&self, request: Request) -> Response {
        self.boot();
        let request = Arc::new(request);
        let view = self.container.child();
        view.instance(REQUEST, request.clone());

        match &self.async_dispatcher {
            Some(dispatcher) => {
                self.handler
                    .handle_async(&view, &**dispatcher, &request, |req, resp| {
                        self.finish_request(&view, req, resp)
                    })
                    .await
            }
            None => {
                let blocking = SyncDispatch(self.dispatcher.clone());
                self.handler
                    .handle_async(&view, &blocking, &request, |req, resp| {
                        self.finish_request(&view, req, resp)
                    })
                    .await
            }
        }
    }

    /// Clears request-scoped state after a response was sent.
    ///
    /// [`handle`](Self::handle) already calls this; adapters that drive the
    /// [`RequestHandler`] themselves must call it once per request.
    pub fn after_request(&self, request: &Request, response: &Response) {
        self.finish_request(&self.container, request, Some(response));
    }

    fn finish_request(&self, container: &Container, request: &Request, response: Option<&Response>) {
        self.state.after_request();
        if self.profile.is_long_running() {
            let flushed = container.forget_scoped_instances();
            if flushed > 0 {
                tracing::trace!(flushed, "scoped instances flushed");
            }
        } else {
            // The traditional process ends with the request.
            self.lifecycle.on_terminate();
        }
        self.observers.after_request(request, response);
    }

    /// Shuts the application down. Long-running profiles fire `on_terminate`
    /// here; the traditional profile already did after its request. Only the
    /// first call has an effect.
    pub fn terminate(&self) {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return;
        }
        if self.profile.is_long_running() {
            self.lifecycle.on_terminate();
        }
        self.observers.terminated(self.profile);
        tracing::info!(profile = %self.profile, "application terminated");
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl fmt::Debug for Application {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Application")
            .field("profile", &self.profile)
            .field("config", &self.config)
            .field("booted", &self.is_booted())
            .field("observers", &self.observers.len())
            .field("container", &self.container)
            .finish()
    }
}

/// Runs a sync dispatcher on the async path.
struct SyncDispatch(Arc<dyn Dispatcher>);

#[async_trait]
impl AsyncDispatcher for SyncDispatch {
    async fn dispatch(&self, container: &Container, request: &Request) -> Result<Response, DispatchError> {
        self.0.dispatch(container, request)
    }
}
