//! Dependency injection container.
//!
//! The [`Container`] keeps bindings (how to build an abstract) and instances
//! (what has already been built) keyed by abstract name. It is shared by every
//! request a worker handles, so per-request work goes through
//! [`Container::run_scope`] or a [`Container::child`] view, both of which
//! guarantee that objects created for one request never leak into the next.

use std::any::{type_name, TypeId};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::error::{DiError, DiResult};
use crate::internal::ResolutionGuard;
use crate::lifetime::Lifetime;

pub mod descriptor;
pub mod scope;

pub use descriptor::{AnyArc, Arguments, ClassDescriptor, ClassRef, Injectable, Parameter, ParameterKind, Params};
pub use scope::{Overrides, ScopeFrame};

/// Factory closure stored in a binding.
pub type FactoryFn = Arc<dyn Fn(&Container, &Params) -> DiResult<AnyArc> + Send + Sync>;

/// What an abstract name resolves to.
#[derive(Clone)]
pub enum Concrete {
    /// An already-built object
    Instance(AnyArc),
    /// A closure that builds the object
    Factory(FactoryFn),
    /// A type built by walking its constructor parameters
    Class(ClassRef),
}

impl Concrete {
    /// Wraps an owned value as an already-built object.
    pub fn value<T: Send + Sync + 'static>(value: T) -> Self {
        Concrete::Instance(Arc::new(value))
    }

    /// Uses an existing `Arc` as the object, keeping its identity.
    pub fn shared<T: Send + Sync + 'static>(value: Arc<T>) -> Self {
        Concrete::Instance(value)
    }

    /// Stores a trait object; resolve it with [`Container::make_trait`].
    pub fn trait_object<T: ?Sized + Send + Sync + 'static>(value: Arc<T>) -> Self {
        Concrete::Instance(Arc::new(value))
    }

    /// Infallible factory.
    pub fn factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(move |c: &Container, _: &Params| -> DiResult<AnyArc> {
            Ok(Arc::new(factory(c)) as AnyArc)
        }))
    }

    /// Fallible factory that also sees the explicit parameters of the `make` call.
    pub fn try_factory<T, F>(factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container, &Params) -> DiResult<T> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(move |c: &Container, p: &Params| -> DiResult<AnyArc> {
            factory(c, p).map(|v| Arc::new(v) as AnyArc)
        }))
    }

    /// Factory producing a trait object.
    pub fn trait_factory<T, F>(factory: F) -> Self
    where
        T: ?Sized + Send + Sync + 'static,
        F: Fn(&Container) -> Arc<T> + Send + Sync + 'static,
    {
        Concrete::Factory(Arc::new(move |c: &Container, _: &Params| -> DiResult<AnyArc> {
            Ok(Arc::new(factory(c)) as AnyArc)
        }))
    }

    /// Constructor-injected type.
    pub fn class<T: Injectable>() -> Self {
        Concrete::Class(ClassRef::of::<T>())
    }
}

impl fmt::Debug for Concrete {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Concrete::Instance(_) => f.write_str("Instance"),
            Concrete::Factory(_) => f.write_str("Factory"),
            Concrete::Class(class) => f.debug_tuple("Class").field(&class.name()).finish(),
        }
    }
}

/// A registered way of building an abstract.
#[derive(Clone, Debug)]
pub struct Binding {
    concrete: Concrete,
    lifetime: Lifetime,
}

impl Binding {
    pub fn new(concrete: Concrete, lifetime: Lifetime) -> Self {
        Self { concrete, lifetime }
    }

    pub fn concrete(&self) -> &Concrete {
        &self.concrete
    }

    pub fn lifetime(&self) -> Lifetime {
        self.lifetime
    }

    /// Whether resolved values are cached as instances.
    pub fn is_shared(&self) -> bool {
        self.lifetime.is_shared()
    }
}

pub(crate) struct ContainerInner {
    parent: Option<Container>,
    bindings: RwLock<HashMap<String, Binding>>,
    instances: RwLock<HashMap<String, AnyArc>>,
    // Shared with child views: descriptors depend only on the type.
    descriptors: Arc<RwLock<HashMap<TypeId, Arc<ClassDescriptor>>>>,
    // Locked after `bindings` and `instances`.
    frames: Mutex<scope::FrameRegistry>,
}

/// Dependency injection registry with scoped execution.
///
/// Cloning a `Container` yields another handle to the same registry.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Concrete, Container, Overrides};
/// use std::sync::Arc;
///
/// struct Logger(&'static str);
///
/// let container = Container::new();
/// let l1 = Arc::new(Logger("file"));
/// container.instance("logger", l1.clone());
///
/// let l2 = Arc::new(Logger("memory"));
/// container.run_scope(Overrides::new().shared("logger", l2.clone()), |c| {
///     let inside = c.make_as::<Logger>("logger").unwrap();
///     assert!(Arc::ptr_eq(&inside, &l2));
/// });
///
/// let after = container.make_as::<Logger>("logger").unwrap();
/// assert!(Arc::ptr_eq(&after, &l1));
/// ```
#[derive(Clone)]
pub struct Container {
    inner: Arc<ContainerInner>,
    // Set on the handle a scope body receives.
    frame: Option<u64>,
}

impl Default for Container {
    fn default() -> Self {
        Self::new()
    }
}

impl Container {
    /// Creates an empty root container.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ContainerInner {
                parent: None,
                bindings: RwLock::new(HashMap::new()),
                instances: RwLock::new(HashMap::new()),
                descriptors: Arc::new(RwLock::new(HashMap::new())),
                frames: Mutex::new(scope::FrameRegistry::default()),
            }),
            frame: None,
        }
    }

    /// Creates a view that resolves through this container but keeps its own
    /// bindings and instances.
    ///
    /// Everything the view builds or registers is dropped with it; the parent
    /// is never written to. Two views of the same parent never observe each
    /// other, which makes a view the per-request container for profiles where
    /// requests interleave.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_lifecycle::{Concrete, Container};
    ///
    /// let root = Container::new();
    /// root.singleton("counter", Concrete::factory(|_| std::sync::atomic::AtomicU32::new(0)));
    ///
    /// let request = root.child();
    /// request.instance("request.id", std::sync::Arc::new(7u64));
    /// assert!(request.make("counter").is_ok());
    ///
    /// assert!(!root.bound("request.id"));
    /// assert!(!root.has_instance("counter"));
    /// ```
    pub fn child(&self) -> Container {
        Container {
            inner: Arc::new(ContainerInner {
                parent: Some(self.clone()),
                bindings: RwLock::new(HashMap::new()),
                instances: RwLock::new(HashMap::new()),
                descriptors: Arc::clone(&self.inner.descriptors),
                frames: Mutex::new(scope::FrameRegistry::default()),
            }),
            frame: None,
        }
    }

    /// The container this view resolves through, if it is a view.
    pub fn parent(&self) -> Option<&Container> {
        self.inner.parent.as_ref()
    }

    /// Whether two handles refer to the same registry.
    pub fn same_as(&self, other: &Container) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    // ===== Registration =====

    /// Registers or replaces the binding for `abstract_name`.
    ///
    /// Existing instances are left alone, so a cached instance keeps winning
    /// until it is forgotten.
    pub fn bind(&self, abstract_name: impl Into<String>, concrete: Concrete, shared: bool) {
        let lifetime = if shared { Lifetime::Singleton } else { Lifetime::Transient };
        self.bind_lifetime(abstract_name, concrete, lifetime);
    }

    /// Registers a binding with an explicit lifetime.
    pub fn bind_lifetime(&self, abstract_name: impl Into<String>, concrete: Concrete, lifetime: Lifetime) {
        let abstract_name = abstract_name.into();
        tracing::trace!(abstract_name = %abstract_name, ?lifetime, "binding registered");
        self.inner
            .bindings
            .write()
            .insert(abstract_name, Binding::new(concrete, lifetime));
    }

    /// Shared binding. An already-built object is stored directly as an instance.
    pub fn singleton(&self, abstract_name: impl Into<String>, concrete: Concrete) {
        match concrete {
            Concrete::Instance(value) => self.instance_any(abstract_name, value),
            other => self.bind_lifetime(abstract_name, other, Lifetime::Singleton),
        }
    }

    /// Binding shared within a request and dropped by [`forget_scoped_instances`](Self::forget_scoped_instances).
    pub fn scoped(&self, abstract_name: impl Into<String>, concrete: Concrete) {
        self.bind_lifetime(abstract_name, concrete, Lifetime::Scoped);
    }

    /// Binds the type name of `T` to its constructor.
    pub fn bind_class<T: Injectable>(&self, shared: bool) {
        self.bind(type_name::<T>(), Concrete::class::<T>(), shared);
    }

    /// Stores a pre-built object; later `make` calls return it without
    /// invoking any factory.
    pub fn instance<T: Send + Sync + 'static>(&self, abstract_name: impl Into<String>, value: Arc<T>) {
        self.instance_any(abstract_name, value);
    }

    /// Stores a pre-built object under the type name of `T`.
    pub fn instance_of<T: Send + Sync + 'static>(&self, value: Arc<T>) {
        self.instance_any(type_name::<T>(), value);
    }

    /// Stores an already type-erased object.
    pub fn instance_any(&self, abstract_name: impl Into<String>, value: AnyArc) {
        let abstract_name = abstract_name.into();
        let mut instances = self.inner.instances.write();
        let previous = instances.insert(abstract_name.clone(), value.clone());
        self.record(&abstract_name, previous, Some(value));
    }

    /// Attributes an instance change to the scope frame this handle belongs to.
    /// Callers hold the `instances` write lock.
    fn record(&self, abstract_name: &str, previous: Option<AnyArc>, current: Option<AnyArc>) {
        if let Some(frame) = self.frame {
            self.inner.frames.lock().record(frame, abstract_name, previous, current);
        }
    }

    // ===== Introspection =====

    /// Whether the abstract has an instance or a binding here or in a parent.
    pub fn bound(&self, abstract_name: &str) -> bool {
        let mut current = Some(self);
        while let Some(c) = current {
            let cached = c.inner.instances.read().contains_key(abstract_name);
            if cached || c.inner.bindings.read().contains_key(abstract_name) {
                return true;
            }
            current = c.inner.parent.as_ref();
        }
        false
    }

    /// Whether this container (not its parents) caches an instance for the abstract.
    pub fn has_instance(&self, abstract_name: &str) -> bool {
        self.inner.instances.read().contains_key(abstract_name)
    }

    /// The binding registered directly on this container.
    pub fn binding(&self, abstract_name: &str) -> Option<Binding> {
        self.inner.bindings.read().get(abstract_name).cloned()
    }

    /// Sorted keys of the instances cached directly on this container.
    pub fn instance_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.inner.instances.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn instance_count(&self) -> usize {
        self.inner.instances.read().len()
    }

    // ===== Removal =====

    /// Drops the cached instance for the abstract, returning it.
    pub fn forget_instance(&self, abstract_name: &str) -> Option<AnyArc> {
        let mut instances = self.inner.instances.write();
        let removed = instances.remove(abstract_name);
        if removed.is_some() {
            self.record(abstract_name, removed.clone(), None);
        }
        removed
    }

    /// Drops every cached instance whose binding is [`Lifetime::Scoped`].
    ///
    /// Bindings of parent containers count, so a view drops the scoped
    /// instances it built for bindings it inherited.
    pub fn forget_scoped_instances(&self) -> usize {
        let mut scoped: HashSet<String> = HashSet::new();
        let mut current = Some(self);
        while let Some(c) = current {
            scoped.extend(
                c.inner
                    .bindings
                    .read()
                    .iter()
                    .filter(|(_, b)| b.lifetime == Lifetime::Scoped)
                    .map(|(k, _)| k.clone()),
            );
            current = c.inner.parent.as_ref();
        }
        let mut instances = self.inner.instances.write();
        let before = instances.len();
        instances.retain(|k, _| !scoped.contains(k));
        before - instances.len()
    }

    /// Removes every binding and instance.
    pub fn flush(&self) {
        self.inner.bindings.write().clear();
        self.inner.instances.write().clear();
    }

    // ===== Resolution =====

    /// Resolves an abstract with no explicit parameters.
    pub fn make(&self, abstract_name: &str) -> DiResult<AnyArc> {
        self.make_with(abstract_name, &Params::new())
    }

    /// Resolves an abstract.
    ///
    /// Lookup order: cached instance, own binding, then each parent's instance
    /// and binding. Shared bindings cache their result on the container doing
    /// the resolution (for a view, the view), unless explicit parameters were
    /// given.
    pub fn make_with(&self, abstract_name: &str, params: &Params) -> DiResult<AnyArc> {
        let _guard = ResolutionGuard::enter(abstract_name)?;

        if let Some(found) = self.inner.instances.read().get(abstract_name).cloned() {
            return Ok(found);
        }

        let binding = match self.inner.bindings.read().get(abstract_name).cloned() {
            Some(binding) => binding,
            None => match self.lookup_ancestors(abstract_name) {
                Some(Inherited::Instance(found)) => return Ok(found),
                Some(Inherited::Binding(binding)) => binding,
                None => return Err(DiError::TargetNotInstantiable(abstract_name.to_string())),
            },
        };

        let value = self.build(&binding.concrete, params)?;
        if binding.is_shared() && params.is_empty() {
            // Another resolution may have raced us; the first stored value wins.
            let mut instances = self.inner.instances.write();
            if let Some(existing) = instances.get(abstract_name) {
                return Ok(existing.clone());
            }
            instances.insert(abstract_name.to_string(), value.clone());
            self.record(abstract_name, None, Some(value.clone()));
            return Ok(value);
        }
        Ok(value)
    }

    /// Resolves and downcasts to a concrete type.
    pub fn make_as<T: Send + Sync + 'static>(&self, abstract_name: &str) -> DiResult<Arc<T>> {
        self.make(abstract_name)?
            .downcast::<T>()
            .map_err(|_| DiError::TypeMismatch(type_name::<T>().to_string()))
    }

    /// Resolves a trait object stored with [`Concrete::trait_object`] or [`Concrete::trait_factory`].
    pub fn make_trait<T: ?Sized + Send + Sync + 'static>(&self, abstract_name: &str) -> DiResult<Arc<T>> {
        self.make(abstract_name)?
            .downcast::<Arc<T>>()
            .map(|boxed| (*boxed).clone())
            .map_err(|_| DiError::TypeMismatch(type_name::<T>().to_string()))
    }

    /// Resolves an [`Injectable`] type.
    ///
    /// Uses the binding for the type name when there is one; otherwise builds
    /// the type directly without caching it.
    pub fn make_class<T: Injectable>(&self) -> DiResult<Arc<T>> {
        self.make_class_with::<T>(&Params::new())
    }

    /// [`make_class`](Self::make_class) with explicit parameters.
    pub fn make_class_with<T: Injectable>(&self, params: &Params) -> DiResult<Arc<T>> {
        let class = ClassRef::of::<T>();
        let any = if self.bound(class.name()) {
            self.make_with(class.name(), params)?
        } else {
            let _guard = ResolutionGuard::enter(class.name())?;
            self.build_class(&class, params)?
        };
        any.downcast::<T>()
            .map_err(|_| DiError::TypeMismatch(type_name::<T>().to_string()))
    }

    fn lookup_ancestors(&self, abstract_name: &str) -> Option<Inherited> {
        let mut current = self.inner.parent.as_ref();
        while let Some(c) = current {
            if let Some(found) = c.inner.instances.read().get(abstract_name).cloned() {
                return Some(Inherited::Instance(found));
            }
            if let Some(binding) = c.inner.bindings.read().get(abstract_name).cloned() {
                return Some(Inherited::Binding(binding));
            }
            current = c.inner.parent.as_ref();
        }
        None
    }

    fn build(&self, concrete: &Concrete, params: &Params) -> DiResult<AnyArc> {
        match concrete {
            Concrete::Instance(value) => Ok(value.clone()),
            Concrete::Factory(factory) => factory(self, params),
            Concrete::Class(class) => self.build_class(class, params),
        }
    }

    /// Descriptor for a class, built on first use and cached by type.
    fn descriptor(&self, class: &ClassRef) -> Arc<ClassDescriptor> {
        if let Some(found) = self.inner.descriptors.read().get(&class.type_id()) {
            return found.clone();
        }
        let built = Arc::new(class.describe());
        self.inner
            .descriptors
            .write()
            .entry(class.type_id())
            .or_insert(built)
            .clone()
    }

    /// Number of cached class descriptors.
    pub fn descriptor_count(&self) -> usize {
        self.inner.descriptors.read().len()
    }

    fn build_class(&self, class: &ClassRef, params: &Params) -> DiResult<AnyArc> {
        let descriptor = self.descriptor(class);
        let mut args = Arguments::new(descriptor.class());
        for parameter in descriptor.parameters() {
            let value = self.resolve_parameter(descriptor.class(), parameter, params)?;
            args.insert(parameter.name(), value);
        }
        descriptor.construct(args)
    }

    /// Explicit parameter, then container resolution, then the declared default.
    fn resolve_parameter(&self, class: &str, parameter: &Parameter, params: &Params) -> DiResult<AnyArc> {
        if let Some(explicit) = params.get(parameter.name()) {
            return Ok(explicit.clone());
        }

        let unresolvable = || DiError::UnresolvableDependency {
            class: class.to_string(),
            parameter: parameter.name().to_string(),
        };

        let (target, resolved) = match parameter.kind() {
            ParameterKind::Service(name) => (name.as_str(), self.make(name)),
            ParameterKind::Class(nested) if self.bound(nested.name()) => (nested.name(), self.make(nested.name())),
            ParameterKind::Class(nested) => {
                let resolved = ResolutionGuard::enter(nested.name())
                    .and_then(|_guard| self.build_class(nested, &Params::new()));
                (nested.name(), resolved)
            }
            ParameterKind::Value(_) => return parameter.default_value().ok_or_else(unresolvable),
        };

        match resolved {
            Ok(value) => Ok(value),
            Err(err @ (DiError::Circular(_) | DiError::DepthExceeded(_))) => Err(err),
            Err(err) => match parameter.default_value() {
                Some(value) => Ok(value),
                None => match err {
                    DiError::TargetNotInstantiable(name) if name == target => Err(unresolvable()),
                    other => Err(other),
                },
            },
        }
    }

    #[cfg(feature = "diagnostics")]
    pub fn to_debug_string(&self) -> String {
        let mut s = String::new();
        s.push_str("=== Container Debug ===\n");
        s.push_str("Bindings:\n");
        let bindings = self.inner.bindings.read();
        let mut keys: Vec<&String> = bindings.keys().collect();
        keys.sort();
        for k in keys {
            let b = &bindings[k];
            s.push_str(&format!("  {}: {:?} ({:?})\n", k, b.concrete, b.lifetime));
        }
        s.push_str("Instances:\n");
        for k in self.instance_keys() {
            s.push_str(&format!("  {}\n", k));
        }
        if self.inner.parent.is_some() {
            s.push_str("(child view)\n");
        }
        s
    }
}

enum Inherited {
    Instance(AnyArc),
    Binding(Binding),
}

impl fmt::Debug for Container {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Container")
            .field("bindings", &self.inner.bindings.read().len())
            .field("instances", &self.inner.instances.read().len())
            .field("child", &self.inner.parent.is_some())
            .field("live_scopes", &self.inner.frames.lock().live())
            .finish()
    }
}
