//! Error types for the container, configuration and request handling.

use thiserror::Error;

/// Dependency injection errors
///
/// Returned by [`Container::make`](crate::Container::make) and friends. These
/// errors are local to a single resolution: the caller decides whether to retry
/// with explicit parameters or propagate.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Container, DiError};
///
/// let container = Container::new();
/// match container.make("mailer") {
///     Err(DiError::TargetNotInstantiable(name)) => assert_eq!(name, "mailer"),
///     _ => unreachable!(),
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiError {
    /// No instance, no binding, and no way to construct the abstract
    #[error("Target [{0}] is not instantiable")]
    TargetNotInstantiable(String),
    /// A constructor parameter had no explicit value, no binding and no default
    #[error("Unresolvable dependency resolving [{parameter}] in class {class}")]
    UnresolvableDependency {
        /// Concrete type being built
        class: String,
        /// Name of the parameter that could not be satisfied
        parameter: String,
    },
    /// Resolved value was not of the requested type
    #[error("Type mismatch for: {0}")]
    TypeMismatch(String),
    /// Circular dependency detected (includes path)
    #[error("Circular dependency: {}", .0.join(" -> "))]
    Circular(Vec<String>),
    /// Maximum recursion depth exceeded
    #[error("Max depth {0} exceeded")]
    DepthExceeded(usize),
}

/// Result type for container operations
pub type DiResult<T> = Result<T, DiError>;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Memory limit string could not be parsed (e.g. `"256Q"`)
    #[error("invalid memory limit {0:?}")]
    InvalidMemoryLimit(String),
    /// A numeric setting could not be parsed
    #[error("invalid value {value:?} for {key}")]
    InvalidValue {
        /// Setting name
        key: String,
        /// Raw value that failed to parse
        value: String,
    },
    /// Settings parsed but are inconsistent with each other
    #[error("invalid configuration: {0}")]
    Invalid(String),
    /// JSON document could not be deserialized
    #[error("malformed configuration document: {0}")]
    Malformed(String),
}

/// Failure returned by a dispatcher. Anything error-like is accepted.
pub type DispatchError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A request failure caught by the request handler.
#[derive(Debug, Error)]
pub enum HandlerFailure {
    /// The dispatcher returned an error
    #[error("request failed: {0}")]
    Dispatch(#[source] DispatchError),
    /// The dispatcher (or a response hook) panicked
    #[error("request panicked: {0}")]
    Panic(String),
}

impl HandlerFailure {
    /// Converts a caught panic payload into a failure, keeping the message when
    /// the payload is a string.
    pub(crate) fn from_panic(payload: Box<dyn std::any::Any + Send>) -> Self {
        let message = if let Some(s) = payload.downcast_ref::<&'static str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "non-string panic payload".to_string()
        };
        HandlerFailure::Panic(message)
    }
}
