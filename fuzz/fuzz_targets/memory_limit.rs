#![no_main]

use ferrous_lifecycle::MemoryLimit;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(raw) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing never panics; whatever parses survives a display round trip.
    if let Ok(limit) = raw.parse::<MemoryLimit>() {
        let reparsed: MemoryLimit = limit.to_string().parse().expect("displayed limit must parse");
        assert_eq!(reparsed, limit);

        if let (Some(bytes), Some(threshold)) = (limit.bytes(), limit.threshold()) {
            assert!(threshold <= bytes);
        }
    }
});
