use ferrous_lifecycle::state;
use ferrous_lifecycle::{
    PersistentStore, RuntimeProfile, StateManager, StateManagerExt, StatefulState, StatelessState,
};
use proptest::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;

fn stateful() -> StatefulState {
    StatefulState::new(Arc::new(PersistentStore::new()))
}

#[test]
fn test_request_isolation() {
    let state = stateful();
    state.set("user", json!("ada"));
    state.set_persistent("boot", json!(1));
    assert_eq!(state.get("user"), Some(json!("ada")));

    state.after_request();

    assert_eq!(state.get("user"), None);
    assert_eq!(state.get_persistent("boot"), Some(json!(1)));
    assert_eq!(state.get("boot"), Some(json!(1)));
}

#[test]
fn test_request_value_shadows_persistent() {
    let state = stateful();
    state.set_persistent("locale", json!("en"));
    state.set("locale", json!("fr"));

    assert_eq!(state.get("locale"), Some(json!("fr")));
    assert_eq!(state.get_persistent("locale"), Some(json!("en")));
    assert_eq!(state.all(), vec![("locale".to_string(), json!("fr"))]);

    state.after_request();
    assert_eq!(state.get("locale"), Some(json!("en")));
}

#[test]
fn test_forget_removes_from_both_namespaces() {
    let state = stateful();
    state.set_persistent("k", json!(1));
    state.set("k", json!(2));
    assert!(state.has("k"));

    state.forget("k");
    assert!(!state.has("k"));
    assert_eq!(state.get_persistent("k"), None);
}

#[test]
fn test_clear_keeps_persistent_namespace() {
    let state = stateful();
    state.set("a", json!(1));
    state.set_persistent("b", json!(2));
    state.clear();

    assert_eq!(state.get("a"), None);
    assert_eq!(state.get("b"), Some(json!(2)));
}

#[test]
fn test_persistent_visible_to_other_managers_sharing_the_store() {
    let store = Arc::new(PersistentStore::new());
    let first = StatefulState::new(store.clone());
    let second = StatefulState::new(store.clone());

    first.set_persistent("token", json!("abc"));
    first.set("only-first", json!(true));

    assert_eq!(second.get_persistent("token"), Some(json!("abc")));
    assert_eq!(second.get("only-first"), None);
    assert!(Arc::ptr_eq(first.persistent(), &store));
}

#[test]
fn test_stats() {
    let state = stateful();
    state.set("a", json!(1));
    state.set("b", json!(2));
    state.set_persistent("c", json!("three"));

    let stats = state.stats();
    assert_eq!(stats.request_state_count, 2);
    assert_eq!(stats.persistent_state_count, 1);
    assert!(stats.memory_bytes > 0);
}

#[test]
fn test_bounded_growth_keeps_newest_entries() {
    let state = stateful();
    for i in 0..1200 {
        state.set_persistent(&format!("key{}", i), json!(i));
    }
    state.after_request();

    let store = state.persistent();
    assert_eq!(store.len(), 800);
    let expected: Vec<String> = (400..1200).map(|i| format!("key{}", i)).collect();
    assert_eq!(store.keys(), expected);
}

#[test]
fn test_no_eviction_at_or_below_ceiling() {
    let store = PersistentStore::new();
    for i in 0..1000 {
        store.set(&format!("key{}", i), json!(i));
    }
    assert_eq!(store.collect_garbage(), 0);
    assert_eq!(store.len(), 1000);
}

#[test]
fn test_overwrite_keeps_insertion_position() {
    let store = PersistentStore::with_limits(3, 2);
    store.set("a", json!(1));
    store.set("b", json!(2));
    store.set("c", json!(3));
    store.set("a", json!(10));
    store.set("d", json!(4));

    assert_eq!(store.collect_garbage(), 2);
    assert_eq!(store.keys(), vec!["c".to_string(), "d".to_string()]);
}

#[test]
fn test_watermark_clamped_to_ceiling() {
    let store = PersistentStore::with_limits(10, 50);
    assert_eq!(store.watermark(), 10);
}

#[test]
fn test_stateless_aliases_persistent_calls() {
    let state = StatelessState::new();
    assert!(!state.is_stateful());
    state.set_persistent("k", json!(1));
    assert_eq!(state.get("k"), Some(json!(1)));

    state.set("k", json!(2));
    assert_eq!(state.get_persistent("k"), Some(json!(2)));

    state.after_request();
    assert!(state.all().is_empty());
    assert_eq!(state.stats().persistent_state_count, 0);
}

#[test]
fn test_for_profile_picks_variant() {
    let store = Arc::new(PersistentStore::new());
    assert!(!state::for_profile(RuntimeProfile::Traditional, store.clone()).is_stateful());
    for profile in [
        RuntimeProfile::WorkerPoolSync,
        RuntimeProfile::EventLoop,
        RuntimeProfile::CoroutineWorker,
    ] {
        assert!(state::for_profile(profile, store.clone()).is_stateful());
    }
}

#[derive(Debug, PartialEq, Serialize, Deserialize)]
struct Session {
    user: String,
    roles: Vec<String>,
}

#[test]
fn test_typed_put_and_fetch() {
    let state = stateful();
    let session = Session { user: "ada".into(), roles: vec!["admin".into()] };
    state.put("session", &session).unwrap();

    let fetched: Option<Session> = state.fetch("session").unwrap();
    assert_eq!(fetched, Some(session));
    assert!(state.fetch::<Session>("missing").unwrap().is_none());
}

proptest! {
    #[test]
    fn shadowing_holds_for_any_values(
        key in "[a-z]{1,8}",
        request_value in any::<i64>(),
        persistent_value in any::<i64>(),
    ) {
        let state = stateful();
        state.set_persistent(&key, json!(persistent_value));
        state.set(&key, json!(request_value));
        prop_assert_eq!(state.get(&key), Some(json!(request_value)));

        state.after_request();
        prop_assert_eq!(state.get(&key), Some(json!(persistent_value)));
    }

    #[test]
    fn persistent_namespace_never_exceeds_ceiling_after_gc(
        ceiling in 1usize..64,
        watermark_gap in 0usize..32,
        inserts in 0usize..200,
    ) {
        let watermark = ceiling.saturating_sub(watermark_gap);
        let store = PersistentStore::with_limits(ceiling, watermark);
        for i in 0..inserts {
            store.set(&format!("k{}", i), json!(i));
        }
        store.collect_garbage();

        prop_assert!(store.len() <= ceiling);
        if inserts > ceiling {
            prop_assert_eq!(store.len(), watermark);
            let expected_first = format!("k{}", inserts - watermark);
            if watermark > 0 {
                prop_assert_eq!(store.keys().first().cloned(), Some(expected_first));
            }
        } else {
            prop_assert_eq!(store.len(), inserts);
        }
    }
}
