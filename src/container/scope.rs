//! Scoped execution: temporary overrides with guaranteed cleanup.
//!
//! [`Container::run_scope`] installs overrides, runs a body, and on every exit
//! path (normal return or panic) evicts what the body created and restores
//! what the overrides replaced. Each live scope is registered on the container
//! with its own backups, so scopes may exit in any order: a frame that is
//! still overridden by a later one hands its backup over instead of writing it.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use super::{AnyArc, Binding, Concrete, Container};
use crate::lifetime::Lifetime;

/// Bindings to override for the duration of a scope.
///
/// Entries are applied in insertion order; when a key repeats, the last entry
/// wins and the value from before the scope is what gets restored.
#[derive(Clone, Default)]
pub struct Overrides {
    entries: Vec<(String, Concrete)>,
}

impl Overrides {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides with any concrete.
    pub fn concrete(mut self, abstract_name: impl Into<String>, concrete: Concrete) -> Self {
        self.entries.push((abstract_name.into(), concrete));
        self
    }

    /// Overrides with an owned value.
    pub fn value<T: Send + Sync + 'static>(self, abstract_name: impl Into<String>, value: T) -> Self {
        self.concrete(abstract_name, Concrete::value(value))
    }

    /// Overrides with an existing object, keeping its identity.
    pub fn shared<T: Send + Sync + 'static>(self, abstract_name: impl Into<String>, value: Arc<T>) -> Self {
        self.concrete(abstract_name, Concrete::shared(value))
    }

    /// Overrides with a factory; it is installed as a shared binding.
    pub fn factory<T, F>(self, abstract_name: impl Into<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(&Container) -> T + Send + Sync + 'static,
    {
        self.concrete(abstract_name, Concrete::factory(factory))
    }
}

impl fmt::Debug for Overrides {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.entries.iter().map(|(k, c)| (k, c))).finish()
    }
}

/// What an override displaced.
struct Backup {
    binding: Option<Binding>,
    instance: Option<AnyArc>,
}

/// An instance change made through a frame's handle.
struct Touch {
    /// Registry clock at the frame's first change.
    first: u64,
    /// Value before the frame first changed the key.
    original: Option<AnyArc>,
    /// Value the frame left behind.
    current: Option<AnyArc>,
}

#[derive(Default)]
struct FrameLog {
    backups: HashMap<String, Backup>,
    touched: HashMap<String, Touch>,
}

impl FrameLog {
    /// Keys this frame still answers for.
    fn owns(&self, key: &str) -> bool {
        self.backups.contains_key(key) || self.touched.contains_key(key)
    }
}

/// Live scope frames of one container, keyed by entry order.
///
/// Frame ids and first changes are stamped from one clock, so both are
/// comparable across frames.
#[derive(Default)]
pub(crate) struct FrameRegistry {
    clock: u64,
    live: BTreeMap<u64, FrameLog>,
}

impl FrameRegistry {
    /// Notes that `frame` changed the instance stored under `key`.
    pub(crate) fn record(&mut self, frame: u64, key: &str, previous: Option<AnyArc>, current: Option<AnyArc>) {
        let stamp = self.clock;
        if let Some(log) = self.live.get_mut(&frame) {
            let touch = log.touched.entry(key.to_string()).or_insert_with(|| Touch {
                first: stamp,
                original: previous,
                current: None,
            });
            touch.current = current;
            self.clock += 1;
        }
    }

    /// Where the first live frame to displace `key` after `stamp`, by
    /// override or by change, keeps the value it displaced.
    fn successor(&mut self, key: &str, stamp: u64) -> Option<&mut Option<AnyArc>> {
        self.live
            .iter_mut()
            .filter_map(|(&id, log)| {
                let FrameLog { backups, touched } = log;
                match backups.get_mut(key) {
                    Some(backup) => Some((id, &mut backup.instance)),
                    None => touched.get_mut(key).map(|touch| (touch.first, &mut touch.original)),
                }
            })
            .filter(|(at, _)| *at > stamp)
            .min_by_key(|(at, _)| *at)
            .map(|(_, slot)| slot)
    }

    pub(crate) fn live(&self) -> usize {
        self.live.len()
    }
}

/// Bookkeeping for one `run_scope` invocation.
///
/// Created on entry and consumed on drop, which makes cleanup unconditional.
/// Frames on one container may be dropped in any order.
pub struct ScopeFrame {
    handle: Container,
    id: u64,
    snapshot: HashSet<String>,
}

impl ScopeFrame {
    /// Records the cached keys and installs the overrides.
    pub fn enter(container: &Container, overrides: Overrides) -> Self {
        let mut bindings = container.inner.bindings.write();
        let mut instances = container.inner.instances.write();
        let mut frames = container.inner.frames.lock();

        let snapshot: HashSet<String> = instances.keys().cloned().collect();
        let id = frames.clock;
        frames.clock += 1;

        let mut log = FrameLog::default();
        for (abstract_name, concrete) in overrides.entries {
            let binding = bindings.remove(&abstract_name);
            let instance = instances.remove(&abstract_name);
            log.backups
                .entry(abstract_name.clone())
                .or_insert(Backup { binding, instance });

            match concrete {
                Concrete::Instance(value) => {
                    instances.insert(abstract_name, value);
                }
                other => {
                    bindings.insert(abstract_name, Binding::new(other, Lifetime::Singleton));
                }
            }
        }

        tracing::trace!(
            frame = id,
            overrides = log.backups.len(),
            cached = snapshot.len(),
            "scope entered"
        );
        frames.live.insert(id, log);

        let handle = Container {
            inner: Arc::clone(&container.inner),
            frame: Some(id),
        };
        Self { handle, id, snapshot }
    }

    /// The handle the scope body resolves through.
    ///
    /// Instances it stores or forgets are attributed to this frame.
    pub fn container(&self) -> &Container {
        &self.handle
    }

    fn exit(&mut self) {
        let inner = &self.handle.inner;
        let mut bindings = inner.bindings.write();
        let mut instances = inner.instances.write();
        let mut frames = inner.frames.lock();
        let log = frames.live.remove(&self.id).unwrap_or_default();

        // Evict what appeared during the scope, except keys another live frame owns.
        let before = instances.len();
        {
            let snapshot = &self.snapshot;
            let others = &frames.live;
            instances.retain(|k, _| snapshot.contains(k) || others.values().any(|o| o.owns(k)));
        }
        let evicted = before - instances.len();

        // Put back pre-existing instances the body replaced or forgot. If the
        // value has changed since, the next live frame to displace it inherits
        // our original instead.
        for (key, touch) in log.touched {
            if log.backups.contains_key(&key) || !self.snapshot.contains(&key) {
                continue;
            }
            let unchanged = match (instances.get(&key), &touch.current) {
                (Some(now), Some(left)) => same_object(now, left),
                (None, None) => true,
                _ => false,
            };
            if !unchanged {
                if let Some(slot) = frames.successor(&key, touch.first) {
                    *slot = touch.original;
                }
                continue;
            }
            match touch.original {
                Some(original) => instances.insert(key, original),
                None => instances.remove(&key),
            };
        }

        for (key, backup) in log.backups {
            // A later frame overriding the same key restores on our behalf.
            let heir = frames
                .live
                .range_mut(self.id + 1..)
                .map(|(_, other)| other)
                .find(|other| other.backups.contains_key(&key));
            if let Some(heir) = heir {
                heir.backups.insert(key, backup);
                continue;
            }
            match backup.binding {
                Some(binding) => bindings.insert(key.clone(), binding),
                None => bindings.remove(&key),
            };
            match backup.instance {
                Some(instance) => instances.insert(key, instance),
                None => instances.remove(&key),
            };
        }

        tracing::trace!(frame = self.id, evicted, "scope exited");
    }
}

impl Drop for ScopeFrame {
    fn drop(&mut self) {
        self.exit();
    }
}

impl fmt::Debug for ScopeFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopeFrame")
            .field("id", &self.id)
            .field("cached_on_entry", &self.snapshot.len())
            .finish()
    }
}

fn same_object(a: &AnyArc, b: &AnyArc) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

impl Container {
    /// Runs `body` with temporary overrides, then restores the container.
    ///
    /// On every exit path, including a panic unwinding out of `body`:
    ///
    /// 1. instances that appeared during the body are evicted;
    /// 2. pre-existing instances the body replaced or forgot through the handle
    ///    it was given are put back, unless something changed them since;
    /// 3. the bindings and instances the overrides displaced are restored, and
    ///    override bindings with nothing to restore are removed.
    ///
    /// A panic is re-raised once cleanup has finished; an `Err` returned by the
    /// body is simply returned.
    ///
    /// Scopes on one container may also *interleave* (two in-flight requests
    /// calling `run_scope` on the same handle) and exit in any order. An exiting
    /// scope leaves the other's overrides and instances alone and never brings
    /// back an override of a scope that already exited. Once every scope has
    /// exited, the container holds what it held before the first one entered.
    /// While both are live, each sees the other's overrides; give each such
    /// request its own [`child`](Self::child) view when that matters.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use ferrous_lifecycle::{Concrete, Container, Overrides};
    ///
    /// let container = Container::new();
    /// container.singleton("clock", Concrete::factory(|_| std::time::Instant::now()));
    ///
    /// container.run_scope(Overrides::new().value("request.path", "/health"), |c| {
    ///     assert_eq!(*c.make_as::<&str>("request.path").unwrap(), "/health");
    ///     c.make("clock").unwrap();
    /// });
    ///
    /// assert!(!container.bound("request.path"));
    /// assert!(!container.has_instance("clock"));
    /// ```
    pub fn run_scope<T, F>(&self, overrides: Overrides, body: F) -> T
    where
        F: FnOnce(&Container) -> T,
    {
        let frame = ScopeFrame::enter(self, overrides);
        let output = body(frame.container());
        drop(frame);
        output
    }
}
