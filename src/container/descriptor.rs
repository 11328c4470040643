//! Constructor metadata for container-built types.
//!
//! Instead of runtime reflection, a type that the container may construct
//! implements [`Injectable`]: it lists its constructor parameters once, and the
//! container walks that list to gather arguments. The resulting
//! [`ClassDescriptor`] is cached per concrete type.

use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{DiError, DiResult};

/// Type-erased shared value, the unit of storage in the container.
pub type AnyArc = Arc<dyn Any + Send + Sync>;

type DefaultFn = Arc<dyn Fn() -> AnyArc + Send + Sync>;

/// A type the container can construct from its parameter list.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Arguments, Container, DiResult, Injectable, Parameter};
/// use std::sync::Arc;
///
/// struct Config { dsn: String }
///
/// struct Repository { config: Arc<Config>, pool_size: u32 }
///
/// impl Injectable for Repository {
///     fn parameters() -> Vec<Parameter> {
///         vec![
///             Parameter::service::<Config>("config"),
///             Parameter::value::<u32>("pool_size").with_default(4u32),
///         ]
///     }
///
///     fn construct(args: &mut Arguments) -> DiResult<Self> {
///         Ok(Repository {
///             config: args.service("config")?,
///             pool_size: args.value("pool_size")?,
///         })
///     }
/// }
///
/// let container = Container::new();
/// container.instance_of::<Config>(Arc::new(Config { dsn: "sqlite::memory:".into() }));
/// let repo = container.make_class::<Repository>().unwrap();
/// assert_eq!(repo.pool_size, 4);
/// assert_eq!(repo.config.dsn, "sqlite::memory:");
/// ```
pub trait Injectable: Sized + Send + Sync + 'static {
    /// Constructor parameters, in declaration order.
    fn parameters() -> Vec<Parameter>;

    /// Builds the value from resolved arguments.
    fn construct(args: &mut Arguments) -> DiResult<Self>;
}

/// What a constructor parameter needs.
#[derive(Clone)]
pub enum ParameterKind {
    /// A service resolved by abstract name
    Service(String),
    /// A constructible type; built directly when nothing is bound for it
    Class(ClassRef),
    /// A plain value that only explicit parameters or a default can satisfy
    Value(&'static str),
}

impl fmt::Debug for ParameterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParameterKind::Service(name) => f.debug_tuple("Service").field(name).finish(),
            ParameterKind::Class(class) => f.debug_tuple("Class").field(&class.name()).finish(),
            ParameterKind::Value(ty) => f.debug_tuple("Value").field(ty).finish(),
        }
    }
}

/// One constructor parameter.
#[derive(Clone)]
pub struct Parameter {
    name: &'static str,
    kind: ParameterKind,
    default: Option<DefaultFn>,
}

impl Parameter {
    /// Service parameter keyed by the type name of `T`.
    pub fn service<T: ?Sized + 'static>(name: &'static str) -> Self {
        Self::service_named(name, type_name::<T>())
    }

    /// Service parameter keyed by an explicit abstract name.
    pub fn service_named(name: &'static str, abstract_name: impl Into<String>) -> Self {
        Self { name, kind: ParameterKind::Service(abstract_name.into()), default: None }
    }

    /// Parameter of a type the container can build on its own.
    pub fn class<T: Injectable>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::Class(ClassRef::of::<T>()), default: None }
    }

    /// Plain value parameter.
    pub fn value<T: 'static>(name: &'static str) -> Self {
        Self { name, kind: ParameterKind::Value(type_name::<T>()), default: None }
    }

    /// Fallback used when the parameter cannot be resolved otherwise.
    pub fn with_default<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.default = Some(Arc::new(move || Arc::new(value.clone()) as AnyArc));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn kind(&self) -> &ParameterKind {
        &self.kind
    }

    pub fn has_default(&self) -> bool {
        self.default.is_some()
    }

    pub(crate) fn default_value(&self) -> Option<AnyArc> {
        self.default.as_ref().map(|f| f())
    }
}

impl fmt::Debug for Parameter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameter")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .field("has_default", &self.default.is_some())
            .finish()
    }
}

/// Reference to an [`Injectable`] type, cheap to copy into bindings.
#[derive(Clone, Copy)]
pub struct ClassRef {
    type_id: TypeId,
    name: &'static str,
    describe: fn() -> ClassDescriptor,
}

impl ClassRef {
    pub fn of<T: Injectable>() -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            name: type_name::<T>(),
            describe: ClassDescriptor::of::<T>,
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Type name, which is also the abstract name the type is bound under by default.
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub(crate) fn describe(&self) -> ClassDescriptor {
        (self.describe)()
    }
}

impl fmt::Debug for ClassRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ClassRef").field(&self.name).finish()
    }
}

/// Parameter list and constructor of one concrete type.
pub struct ClassDescriptor {
    class: &'static str,
    parameters: Vec<Parameter>,
    build: fn(&mut Arguments) -> DiResult<AnyArc>,
}

impl ClassDescriptor {
    pub fn of<T: Injectable>() -> Self {
        fn build<T: Injectable>(args: &mut Arguments) -> DiResult<AnyArc> {
            T::construct(args).map(|value| Arc::new(value) as AnyArc)
        }
        Self {
            class: type_name::<T>(),
            parameters: T::parameters(),
            build: build::<T>,
        }
    }

    pub fn class(&self) -> &'static str {
        self.class
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    pub(crate) fn construct(&self, mut args: Arguments) -> DiResult<AnyArc> {
        (self.build)(&mut args)
    }
}

impl fmt::Debug for ClassDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDescriptor")
            .field("class", &self.class)
            .field("parameters", &self.parameters)
            .finish()
    }
}

/// Explicit parameter values passed to [`Container::make_with`](crate::Container::make_with).
///
/// Keyed by parameter name; explicit values win over anything the container
/// would infer.
#[derive(Clone, Default)]
pub struct Params {
    values: HashMap<String, AnyArc>,
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with<T: Send + Sync + 'static>(mut self, name: impl Into<String>, value: T) -> Self {
        self.values.insert(name.into(), Arc::new(value));
        self
    }

    pub fn with_shared(mut self, name: impl Into<String>, value: AnyArc) -> Self {
        self.values.insert(name.into(), value);
        self
    }

    pub fn get(&self, name: &str) -> Option<&AnyArc> {
        self.values.get(name)
    }

    /// Typed lookup of a value passed by name.
    pub fn value<T: Clone + 'static>(&self, name: &str) -> Option<T> {
        self.values.get(name).and_then(|v| v.downcast_ref::<T>()).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }
}

impl fmt::Debug for Params {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.values.keys()).finish()
    }
}

/// Resolved constructor arguments handed to [`Injectable::construct`].
pub struct Arguments {
    class: &'static str,
    values: HashMap<&'static str, AnyArc>,
}

impl Arguments {
    pub(crate) fn new(class: &'static str) -> Self {
        Self { class, values: HashMap::new() }
    }

    pub(crate) fn insert(&mut self, name: &'static str, value: AnyArc) {
        self.values.insert(name, value);
    }

    fn take(&mut self, name: &str) -> DiResult<AnyArc> {
        self.values.remove(name).ok_or_else(|| DiError::UnresolvableDependency {
            class: self.class.to_string(),
            parameter: name.to_string(),
        })
    }

    /// Takes a shared service argument.
    pub fn service<T: Send + Sync + 'static>(&mut self, name: &str) -> DiResult<Arc<T>> {
        self.take(name)?
            .downcast::<T>()
            .map_err(|_| DiError::TypeMismatch(type_name::<T>().to_string()))
    }

    /// Takes a trait-object argument stored as `Arc<Arc<T>>`.
    pub fn trait_object<T: ?Sized + Send + Sync + 'static>(&mut self, name: &str) -> DiResult<Arc<T>> {
        self.take(name)?
            .downcast::<Arc<T>>()
            .map(|boxed| (*boxed).clone())
            .map_err(|_| DiError::TypeMismatch(type_name::<T>().to_string()))
    }

    /// Takes a plain value argument by clone.
    pub fn value<T: Clone + 'static>(&mut self, name: &str) -> DiResult<T> {
        let any = self.take(name)?;
        any.downcast_ref::<T>()
            .cloned()
            .ok_or_else(|| DiError::TypeMismatch(type_name::<T>().to_string()))
    }
}
