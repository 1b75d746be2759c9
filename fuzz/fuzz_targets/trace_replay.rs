#![no_main]

use libfuzzer_sys::fuzz_target;
use vmprof::config::ProfilerConfig;
use vmprof::replay::replay;

fuzz_target!(|data: &[u8]| {
    // Arbitrary event orderings and register values must never panic the engine
    let _ = replay(data, &ProfilerConfig::default());
});
