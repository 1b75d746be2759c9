#![no_main]

use libfuzzer_sys::fuzz_target;
use vmprof::replay::parse_event;

fuzz_target!(|data: &[u8]| {
    if let Ok(input) = std::str::from_utf8(data) {
        // Malformed lines must come back as errors, never panics
        let _ = parse_event(1, input);
    }
});
