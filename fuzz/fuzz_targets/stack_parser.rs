#![no_main]

use calltree::call_graph::CallGraph;
use calltree::trace_output::load_from_str;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Convert arbitrary bytes to UTF-8 string (lossy conversion)
    if let Ok(input) = std::str::from_utf8(data) {
        // Loading arbitrary trace output should never panic
        let mut graph = CallGraph::new();
        load_from_str(input, &mut graph);
    }
});
