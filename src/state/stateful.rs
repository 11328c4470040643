use std::collections::{BTreeMap, HashMap};

use parking_lot::Mutex;
use serde_json::Value;

use super::{entry_size, StateManager, StateStats};
use std::sync::Arc;

/// Default persistent entry ceiling.
pub const DEFAULT_CEILING: usize = 1000;
/// Default count eviction trims down to.
pub const DEFAULT_WATERMARK: usize = 800;

#[derive(Debug, Default)]
struct StoreInner {
    // key -> (insertion sequence, value)
    entries: HashMap<String, (u64, Value)>,
    // insertion sequence -> key, oldest first
    order: BTreeMap<u64, String>,
    next_seq: u64,
}

/// Process-wide persistent namespace.
///
/// Owned by the application and injected into [`StatefulState`], so tests can
/// build as many independent stores as they like. Entries remember when they
/// were first inserted; overwriting a key keeps its position. When
/// [`collect_garbage`](Self::collect_garbage) finds more than `ceiling`
/// entries it evicts the oldest down to `watermark`.
#[derive(Debug)]
pub struct PersistentStore {
    inner: Mutex<StoreInner>,
    ceiling: usize,
    watermark: usize,
}

impl Default for PersistentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentStore {
    pub fn new() -> Self {
        Self::with_limits(DEFAULT_CEILING, DEFAULT_WATERMARK)
    }

    /// Store with custom limits. A watermark above the ceiling is clamped to it.
    pub fn with_limits(ceiling: usize, watermark: usize) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            ceiling,
            watermark: watermark.min(ceiling),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn watermark(&self) -> usize {
        self.watermark
    }

    pub fn set(&self, key: &str, value: Value) {
        let mut inner = self.inner.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.1 = value;
            return;
        }
        let seq = inner.next_seq;
        inner.next_seq += 1;
        inner.order.insert(seq, key.to_string());
        inner.entries.insert(key.to_string(), (seq, value));
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        self.inner.lock().entries.get(key).map(|(_, v)| v.clone())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.inner.lock().entries.contains_key(key)
    }

    pub fn forget(&self, key: &str) -> Option<Value> {
        let mut inner = self.inner.lock();
        let (seq, value) = inner.entries.remove(key)?;
        inner.order.remove(&seq);
        Some(value)
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Keys, oldest first.
    pub fn keys(&self) -> Vec<String> {
        self.inner.lock().order.values().cloned().collect()
    }

    /// Entries, oldest first.
    pub fn entries(&self) -> Vec<(String, Value)> {
        let inner = self.inner.lock();
        inner
            .order
            .values()
            .filter_map(|k| inner.entries.get(k).map(|(_, v)| (k.clone(), v.clone())))
            .collect()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.order.clear();
    }

    pub fn memory_bytes(&self) -> usize {
        self.inner
            .lock()
            .entries
            .iter()
            .map(|(k, (_, v))| entry_size(k, v))
            .sum()
    }

    /// Evicts the oldest entries down to the watermark once the ceiling is
    /// exceeded. Returns how many entries were evicted.
    pub fn collect_garbage(&self) -> usize {
        let mut inner = self.inner.lock();
        if inner.entries.len() <= self.ceiling {
            return 0;
        }
        let excess = inner.entries.len() - self.watermark;
        for _ in 0..excess {
            let Some((_, key)) = inner.order.pop_first() else { break };
            inner.entries.remove(&key);
        }
        tracing::debug!(
            evicted = excess,
            remaining = inner.entries.len(),
            ceiling = self.ceiling,
            "persistent state trimmed"
        );
        excess
    }
}

/// Two-namespace state for long-running workers.
///
/// # Examples
///
/// ```rust
/// use ferrous_lifecycle::{PersistentStore, StateManager, StatefulState};
/// use serde_json::json;
/// use std::sync::Arc;
///
/// let state = StatefulState::new(Arc::new(PersistentStore::new()));
/// state.set("user", json!("ada"));
/// state.set_persistent("boot.time", json!(1700000000));
/// state.after_request();
///
/// assert!(state.get("user").is_none());
/// assert_eq!(state.get_persistent("boot.time"), Some(json!(1700000000)));
/// ```
#[derive(Debug)]
pub struct StatefulState {
    request: Mutex<HashMap<String, Value>>,
    persistent: Arc<PersistentStore>,
}

impl StatefulState {
    pub fn new(persistent: Arc<PersistentStore>) -> Self {
        Self {
            request: Mutex::new(HashMap::new()),
            persistent,
        }
    }

    /// The persistent namespace this manager writes to.
    pub fn persistent(&self) -> &Arc<PersistentStore> {
        &self.persistent
    }
}

impl StateManager for StatefulState {
    fn set(&self, key: &str, value: Value) {
        self.request.lock().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.request.lock().get(key) {
            return Some(value.clone());
        }
        self.persistent.get(key)
    }

    fn has(&self, key: &str) -> bool {
        self.request.lock().contains_key(key) || self.persistent.contains(key)
    }

    fn forget(&self, key: &str) {
        self.request.lock().remove(key);
        self.persistent.forget(key);
    }

    fn clear(&self) {
        self.request.lock().clear();
    }

    fn all(&self) -> Vec<(String, Value)> {
        let mut merged: HashMap<String, Value> = self.persistent.entries().into_iter().collect();
        for (k, v) in self.request.lock().iter() {
            merged.insert(k.clone(), v.clone());
        }
        let mut all: Vec<(String, Value)> = merged.into_iter().collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn is_stateful(&self) -> bool {
        true
    }

    fn set_persistent(&self, key: &str, value: Value) {
        self.persistent.set(key, value);
    }

    fn get_persistent(&self, key: &str) -> Option<Value> {
        self.persistent.get(key)
    }

    fn stats(&self) -> StateStats {
        let request = self.request.lock();
        let request_bytes: usize = request.iter().map(|(k, v)| entry_size(k, v)).sum();
        StateStats {
            request_state_count: request.len(),
            persistent_state_count: self.persistent.len(),
            memory_bytes: request_bytes + self.persistent.memory_bytes(),
        }
    }

    fn after_request(&self) {
        self.request.lock().clear();
        self.persistent.collect_garbage();
    }
}
