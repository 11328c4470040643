use ferrous_lifecycle::container::ScopeFrame;
use ferrous_lifecycle::{Concrete, Container, DiError, Overrides};
use proptest::prelude::*;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Barrier};

#[derive(Debug, PartialEq)]
struct Logger(&'static str);

fn logger(container: &Container) -> Arc<Logger> {
    container.make_as::<Logger>("logger").unwrap()
}

#[test]
fn test_override_visible_inside_and_restored_after() {
    let container = Container::new();
    let l1 = Arc::new(Logger("L1"));
    container.singleton("logger", Concrete::shared(l1.clone()));
    let l2 = Arc::new(Logger("L2"));

    container.run_scope(Overrides::new().shared("logger", l2.clone()), |c| {
        assert!(Arc::ptr_eq(&logger(c), &l2));
    });

    assert!(Arc::ptr_eq(&logger(&container), &l1));
}

#[test]
fn test_factory_override_is_shared_within_scope() {
    let container = Container::new();
    container.singleton("logger", Concrete::value(Logger("L1")));

    container.run_scope(Overrides::new().factory("logger", |_| Logger("scoped")), |c| {
        let a = logger(c);
        let b = logger(c);
        assert_eq!(a.0, "scoped");
        assert!(Arc::ptr_eq(&a, &b));
    });

    assert_eq!(logger(&container).0, "L1");
    assert!(container.binding("logger").is_none());
}

#[test]
fn test_override_binding_without_backup_is_removed() {
    let container = Container::new();

    container.run_scope(Overrides::new().value("request.id", 42u64), |c| {
        assert_eq!(*c.make_as::<u64>("request.id").unwrap(), 42);
    });

    assert!(!container.bound("request.id"));
    assert_eq!(
        container.make("request.id").err(),
        Some(DiError::TargetNotInstantiable("request.id".into()))
    );
}

#[test]
fn test_instances_created_in_scope_are_evicted() {
    let container = Container::new();
    container.singleton("warm", Concrete::factory(|_| AtomicU32::new(0)));
    container.singleton("lazy", Concrete::factory(|_| AtomicU32::new(0)));
    let warm = container.make_as::<AtomicU32>("warm").unwrap();

    container.run_scope(Overrides::new(), |c| {
        c.make("lazy").unwrap();
        assert!(c.has_instance("lazy"));
        assert!(Arc::ptr_eq(&c.make_as::<AtomicU32>("warm").unwrap(), &warm));
    });

    assert!(!container.has_instance("lazy"));
    assert!(Arc::ptr_eq(&container.make_as::<AtomicU32>("warm").unwrap(), &warm));
}

#[test]
fn test_instances_replaced_in_scope_are_put_back() {
    let container = Container::new();
    let original = Arc::new(Logger("original"));
    container.instance("logger", original.clone());

    container.run_scope(Overrides::new(), |c| {
        c.instance("logger", Arc::new(Logger("replaced")));
        c.forget_instance("logger");
    });

    assert!(Arc::ptr_eq(&logger(&container), &original));
}

#[test]
fn test_nested_scopes_unwind_lifo() {
    let container = Container::new();
    container.singleton("logger", Concrete::value(Logger("root")));

    container.run_scope(Overrides::new().value("logger", Logger("outer")), |outer| {
        assert_eq!(logger(outer).0, "outer");

        outer.run_scope(Overrides::new().value("logger", Logger("inner")), |inner| {
            assert_eq!(logger(inner).0, "inner");
        });

        assert_eq!(logger(outer).0, "outer");
    });

    assert_eq!(logger(&container).0, "root");
}

#[test]
fn test_err_from_body_is_returned_after_cleanup() {
    let container = Container::new();
    container.singleton("logger", Concrete::value(Logger("L1")));

    let result: Result<(), DiError> = container.run_scope(Overrides::new().value("logger", Logger("L2")), |c| {
        c.make("missing")?;
        Ok(())
    });

    assert_eq!(result, Err(DiError::TargetNotInstantiable("missing".into())));
    assert_eq!(logger(&container).0, "L1");
}

#[test]
fn test_panic_in_body_still_cleans_up() {
    let container = Container::new();
    container.singleton("logger", Concrete::value(Logger("L1")));
    container.singleton("lazy", Concrete::factory(|_| AtomicU32::new(0)));

    let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
        container.run_scope(Overrides::new().value("logger", Logger("L2")), |c| {
            c.make("lazy").unwrap();
            panic!("request blew up");
        })
    }));

    assert!(outcome.is_err());
    assert_eq!(logger(&container).0, "L1");
    assert!(!container.has_instance("lazy"));
}

#[test]
fn test_scope_on_child_view_leaves_parent_untouched() {
    let root = Container::new();
    root.singleton("logger", Concrete::value(Logger("root")));
    let view = root.child();

    view.run_scope(Overrides::new().value("logger", Logger("view")), |c| {
        assert_eq!(logger(c).0, "view");
        assert_eq!(logger(&root).0, "root");
    });

    assert_eq!(logger(&view).0, "root");
}

#[test]
fn test_interleaved_requests_use_separate_views() {
    let root = Container::new();
    root.singleton("counter", Concrete::factory(|_| AtomicU32::new(0)));
    let shared = root.make_as::<AtomicU32>("counter").unwrap();

    let handles: Vec<_> = (0..8u32)
        .map(|n| {
            let root = root.clone();
            std::thread::spawn(move || {
                let view = root.child();
                view.run_scope(Overrides::new().value("request.n", n), |c| {
                    c.make_as::<AtomicU32>("counter").unwrap().fetch_add(1, Ordering::SeqCst);
                    std::thread::yield_now();
                    *c.make_as::<u32>("request.n").unwrap()
                })
            })
        })
        .collect();

    let mut seen: Vec<u32> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (0..8u32).collect::<Vec<_>>());
    assert_eq!(shared.load(Ordering::SeqCst), 8);
    assert!(!root.bound("request.n"));
}

#[test]
fn test_interleaved_scopes_exit_out_of_order() {
    let root = Container::new();
    let l1 = Arc::new(Logger("L1"));
    root.instance("logger", l1.clone());

    let a = ScopeFrame::enter(&root, Overrides::new().shared("logger", Arc::new(Logger("LA"))));
    let b = ScopeFrame::enter(&root, Overrides::new().value("db", 1u32));
    b.container().instance("session", Arc::new(Logger("S")));

    drop(a);
    assert_eq!(*b.container().make_as::<u32>("db").unwrap(), 1);
    assert!(root.has_instance("session"));
    assert!(Arc::ptr_eq(&logger(&root), &l1));

    drop(b);
    assert!(!root.bound("db"));
    assert!(!root.has_instance("session"));
    assert!(Arc::ptr_eq(&logger(&root), &l1));
    assert_eq!(root.instance_keys(), vec!["logger".to_string()]);
}

#[test]
fn test_same_key_overridden_by_interleaved_scopes() {
    let root = Container::new();
    let l1 = Arc::new(Logger("L1"));
    root.instance("logger", l1.clone());
    let lb = Arc::new(Logger("LB"));

    let a = ScopeFrame::enter(&root, Overrides::new().value("logger", Logger("LA")));
    let b = ScopeFrame::enter(&root, Overrides::new().shared("logger", lb.clone()));

    drop(a);
    assert!(Arc::ptr_eq(&logger(&root), &lb));

    drop(b);
    assert!(Arc::ptr_eq(&logger(&root), &l1));
}

#[test]
fn test_instance_replaced_by_interleaved_scopes_is_restored() {
    let root = Container::new();
    let original = Arc::new(Logger("original"));
    root.instance("logger", original.clone());

    let a = ScopeFrame::enter(&root, Overrides::new());
    let b = ScopeFrame::enter(&root, Overrides::new());
    a.container().instance("logger", Arc::new(Logger("from a")));
    b.container().instance("logger", Arc::new(Logger("from b")));

    drop(a);
    assert_eq!(logger(&root).0, "from b");

    drop(b);
    assert!(Arc::ptr_eq(&logger(&root), &original));
}

#[test]
fn test_threads_sharing_one_container_restore_it() {
    let root = Container::new();
    let l1 = Arc::new(Logger("L1"));
    root.instance("logger", l1.clone());
    let entered = Arc::new(Barrier::new(2));
    let a_done = Arc::new(Barrier::new(2));

    let a = {
        let (root, entered, a_done) = (root.clone(), entered.clone(), a_done.clone());
        std::thread::spawn(move || {
            root.run_scope(Overrides::new().value("logger", Logger("LA")), |_| {
                entered.wait();
            });
            a_done.wait();
        })
    };
    let b = {
        let root = root.clone();
        std::thread::spawn(move || {
            root.run_scope(Overrides::new().value("db", 1u32), |c| {
                entered.wait();
                a_done.wait();
                *c.make_as::<u32>("db").unwrap()
            })
        })
    };

    a.join().unwrap();
    assert_eq!(b.join().unwrap(), 1);
    assert!(Arc::ptr_eq(&logger(&root), &l1));
    assert!(!root.bound("db"));
}

#[derive(Debug, Clone)]
enum Op {
    Make(u8),
    Instance(u8),
    Forget(u8),
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0u8..6).prop_map(Op::Make),
        (0u8..6).prop_map(Op::Instance),
        (0u8..6).prop_map(Op::Forget),
    ]
}

fn key(n: u8) -> String {
    format!("svc{}", n)
}

fn seeded() -> Container {
    let container = Container::new();
    for n in 0..6u8 {
        match n % 3 {
            0 => container.instance(key(n), Arc::new(n)),
            1 => container.singleton(key(n), Concrete::factory(move |_| n)),
            _ => container.bind(key(n), Concrete::factory(move |_| n), false),
        }
    }
    // Materialize one lazily-shared service before the scope begins.
    container.make(&key(1)).unwrap();
    container
}

fn identities(container: &Container) -> HashMap<String, usize> {
    container
        .instance_keys()
        .into_iter()
        .filter_map(|k| {
            container
                .make(&k)
                .ok()
                .map(|v| (k, Arc::as_ptr(&v) as *const () as usize))
        })
        .collect()
}

proptest! {
    #[test]
    fn scope_isolation_holds_for_any_operation_sequence(
        overridden in proptest::collection::btree_set(0u8..6, 0..3),
        ops in proptest::collection::vec(op_strategy(), 0..20),
    ) {
        let container = seeded();
        let before = identities(&container);
        let bound_before: Vec<bool> = (0..6u8).map(|n| container.bound(&key(n))).collect();

        let mut overrides = Overrides::new();
        for n in &overridden {
            overrides = overrides.value(key(*n), 100u8 + n);
        }

        container.run_scope(overrides, |c| {
            for op in &ops {
                match op {
                    Op::Make(n) => { let _ = c.make(&key(*n)); }
                    Op::Instance(n) => c.instance(key(*n), Arc::new(200u8 + n)),
                    Op::Forget(n) => { c.forget_instance(&key(*n)); }
                }
            }
        });

        prop_assert_eq!(identities(&container), before);
        let bound_after: Vec<bool> = (0..6u8).map(|n| container.bound(&key(n))).collect();
        prop_assert_eq!(bound_after, bound_before);
    }
}
