use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;

use super::{entry_size, StateManager, StateStats};

/// Single-namespace state for processes that die after one request.
///
/// `set_persistent`/`get_persistent` are aliases for `set`/`get`. The store
/// clears itself on drop as a safety net.
#[derive(Debug, Default)]
pub struct StatelessState {
    entries: Mutex<HashMap<String, Value>>,
}

impl StatelessState {
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateManager for StatelessState {
    fn set(&self, key: &str, value: Value) {
        self.entries.lock().insert(key.to_string(), value);
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.entries.lock().get(key).cloned()
    }

    fn has(&self, key: &str) -> bool {
        self.entries.lock().contains_key(key)
    }

    fn forget(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn clear(&self) {
        self.entries.lock().clear();
    }

    fn all(&self) -> Vec<(String, Value)> {
        let mut all: Vec<(String, Value)> = self
            .entries
            .lock()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        all.sort_by(|a, b| a.0.cmp(&b.0));
        all
    }

    fn is_stateful(&self) -> bool {
        false
    }

    fn set_persistent(&self, key: &str, value: Value) {
        self.set(key, value);
    }

    fn get_persistent(&self, key: &str) -> Option<Value> {
        self.get(key)
    }

    fn stats(&self) -> StateStats {
        let entries = self.entries.lock();
        StateStats {
            request_state_count: entries.len(),
            persistent_state_count: 0,
            memory_bytes: entries.iter().map(|(k, v)| entry_size(k, v)).sum(),
        }
    }

    fn after_request(&self) {
        self.clear();
    }
}

impl Drop for StatelessState {
    fn drop(&mut self) {
        let entries = self.entries.get_mut();
        if !entries.is_empty() {
            tracing::trace!(entries = entries.len(), "clearing stateless state on drop");
            entries.clear();
        }
    }
}
