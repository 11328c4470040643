#![no_main]

use ferrous_lifecycle::PersistentStore;
use libfuzzer_sys::fuzz_target;
use serde_json::json;

fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    let ceiling = (data[0] as usize % 32) + 1;
    let watermark = data[1] as usize % (ceiling + 1);
    let store = PersistentStore::with_limits(ceiling, watermark);

    for (i, &byte) in data[2..].iter().enumerate() {
        let key = format!("k{}", byte % 48);
        if byte & 0x80 != 0 {
            store.forget(&key);
        } else {
            store.set(&key, json!(i));
        }
        if i % 7 == 0 {
            store.collect_garbage();
            assert!(store.len() <= ceiling);
        }
    }

    let before = store.len();
    let evicted = store.collect_garbage();
    if before > ceiling {
        assert_eq!(store.len(), watermark);
        assert_eq!(evicted, before - watermark);
    } else {
        assert_eq!(evicted, 0);
    }
});
