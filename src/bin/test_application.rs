//! Call-tree fixture for tracers and profilers
//!
//! Runs `func6 → {func4 → func2, func3×5}, {func5 → func1×2}` once (8 timed
//! waits of 100ms) and exits 0. Takes no arguments, reads no environment and
//! prints nothing.

use std::process::ExitCode;

fn main() -> ExitCode {
    calltree::fixture::run()
}
