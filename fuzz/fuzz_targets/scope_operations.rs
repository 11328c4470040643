#![no_main]

use ferrous_lifecycle::{Concrete, Container, Overrides};
use libfuzzer_sys::fuzz_target;
use std::sync::Arc;

const KEYS: [&str; 4] = ["logger", "db", "cache", "request"];

fn seeded() -> Container {
    let container = Container::new();
    container.singleton("logger", Concrete::value(0u32));
    container.singleton("db", Concrete::factory(|_| 1u32));
    container.bind("cache", Concrete::factory(|_| 2u32), false);
    container.make("db").expect("db is bound");
    container
}

fn snapshot(container: &Container) -> Vec<(bool, Option<usize>)> {
    KEYS.iter()
        .map(|key| {
            let identity = container
                .has_instance(key)
                .then(|| container.make(key).ok())
                .flatten()
                .map(|v| Arc::as_ptr(&v) as *const () as usize);
            (container.bound(key), identity)
        })
        .collect()
}

fuzz_target!(|data: &[u8]| {
    let Some((&mask, ops)) = data.split_first() else {
        return;
    };

    let container = seeded();
    let before = snapshot(&container);

    let mut overrides = Overrides::new();
    for (i, key) in KEYS.iter().enumerate() {
        if mask & (1 << i) != 0 {
            overrides = overrides.value(*key, 100u32 + i as u32);
        }
    }

    // Each byte picks an operation (high bits) and a key (low bits).
    let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
        container.run_scope(overrides, |c| {
            for &op in ops {
                let key = KEYS[(op & 0b11) as usize];
                match op >> 6 {
                    0 => {
                        let _ = c.make(key);
                    }
                    1 => c.instance(key, Arc::new(op as u32)),
                    2 => {
                        c.forget_instance(key);
                    }
                    _ => {
                        if op == u8::MAX {
                            panic!("abort scope");
                        }
                        c.forget_scoped_instances();
                    }
                }
            }
        })
    }));

    assert_eq!(snapshot(&container), before);
});
