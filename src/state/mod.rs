//! Request-scoped and persistent key/value state.
//!
//! Two interchangeable [`StateManager`] implementations:
//!
//! - [`StatelessState`] for the traditional profile, where the process dies
//!   after the request and "persistent" is meaningless;
//! - [`StatefulState`] for long-running profiles, with a request namespace that
//!   is cleared after every request and a bounded persistent namespace that
//!   survives across requests.

use std::sync::Arc;

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::Value;

use crate::profile::RuntimeProfile;

mod stateful;
mod stateless;

pub use stateful::{PersistentStore, StatefulState};
pub use stateless::StatelessState;

/// Counters reported by [`StateManager::stats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateStats {
    pub request_state_count: usize,
    pub persistent_state_count: usize,
    /// Approximate size of keys plus serialized values
    pub memory_bytes: usize,
}

/// Key/value store distinguishing request-scoped from persistent data.
///
/// Implementations use interior mutability so one manager can be shared by
/// the application and every request it serves.
pub trait StateManager: Send + Sync {
    /// Stores a request-scoped value.
    fn set(&self, key: &str, value: Value);

    /// Looks a key up; request-scoped values shadow persistent ones.
    fn get(&self, key: &str) -> Option<Value>;

    fn has(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Removes a key from every namespace.
    fn forget(&self, key: &str);

    /// Clears the request namespace.
    fn clear(&self);

    /// Merged view of all visible entries, request-scoped values winning.
    fn all(&self) -> Vec<(String, Value)>;

    /// Whether anything survives the end of a request.
    fn is_stateful(&self) -> bool;

    /// Stores a value meant to outlive the request.
    fn set_persistent(&self, key: &str, value: Value);

    fn get_persistent(&self, key: &str) -> Option<Value>;

    fn stats(&self) -> StateStats;

    /// End-of-request hook: clears request state and bounds persistent growth.
    fn after_request(&self);
}

/// Typed conveniences over any [`StateManager`].
pub trait StateManagerExt: StateManager {
    /// Serializes `value` into the request namespace.
    fn put<T: Serialize>(&self, key: &str, value: &T) -> serde_json::Result<()> {
        self.set(key, serde_json::to_value(value)?);
        Ok(())
    }

    /// Deserializes a visible value; `Ok(None)` when the key is absent.
    fn fetch<T: DeserializeOwned>(&self, key: &str) -> serde_json::Result<Option<T>> {
        self.get(key).map(serde_json::from_value).transpose()
    }
}

impl<S: StateManager + ?Sized> StateManagerExt for S {}

/// Picks the state manager variant for a profile.
///
/// Long-running profiles get a [`StatefulState`] over `store`; the traditional
/// profile gets a [`StatelessState`] and `store` is unused.
pub fn for_profile(profile: RuntimeProfile, store: Arc<PersistentStore>) -> Arc<dyn StateManager> {
    if profile.is_long_running() {
        Arc::new(StatefulState::new(store))
    } else {
        Arc::new(StatelessState::new())
    }
}

pub(crate) fn entry_size(key: &str, value: &Value) -> usize {
    key.len() + serde_json::to_vec(value).map(|v| v.len()).unwrap_or(0)
}
