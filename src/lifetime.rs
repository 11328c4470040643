//! Binding lifetimes.

/// How long a resolved binding is cached by the container.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{Concrete, Container};
/// use std::sync::Arc;
///
/// struct Connection;
///
/// let container = Container::new();
/// container.scoped("conn", Concrete::factory(|_| Connection));
///
/// let a = container.make_as::<Connection>("conn").unwrap();
/// let b = container.make_as::<Connection>("conn").unwrap();
/// assert!(Arc::ptr_eq(&a, &b));
///
/// // End of request: scoped instances are dropped, singletons stay
/// container.forget_scoped_instances();
/// let c = container.make_as::<Connection>("conn").unwrap();
/// assert!(!Arc::ptr_eq(&a, &c));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lifetime {
    /// Built once and cached for the life of the container
    Singleton,
    /// Built once and cached until the end of the current request
    Scoped,
    /// Built fresh on every resolution
    Transient,
}

impl Lifetime {
    /// Whether resolved values are cached as instances.
    pub const fn is_shared(self) -> bool {
        !matches!(self, Lifetime::Transient)
    }
}
