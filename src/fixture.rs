//! Deterministic call-tree fixture
//!
//! A fixed, hand-authored call tree for external tracers and profilers to
//! observe and validate against:
//!
//! ```text
//! run
//! └─ func6
//!    ├─ func4
//!    │  ├─ func2(3)
//!    │  └─ func3 ×5
//!    └─ func5
//!       ├─ func1("param1", "param2")
//!       └─ func1("param3", "param4")
//! ```
//!
//! Every leaf performs exactly one [`my_sleep`], so one run is 8 timed waits
//! (~800ms). All functions are unmangled, `extern "C"` and never inlined:
//! uprobes attach to them by symbol name and read `func1`'s C strings and
//! `func2`'s int straight from the argument registers.
//!
//! Each function also opens a `tracing` span named after itself. With no
//! subscriber installed (the `test_application` binary never installs one)
//! the spans are inert.

use crate::timed_wait::my_sleep;
use libc::{c_char, c_int};
use std::ffi::CStr;
use std::process::ExitCode;

/// Leaf calls (and therefore timed waits) in one run
pub const LEAF_CALLS: usize = 8;

/// Consecutive `func3` calls made by `func4`
pub const FUNC3_REPEAT: usize = 5;

/// Literal passed to `func2`
pub const FUNC2_ARG: c_int = 3;

/// Literal string pairs passed to `func1`, in call order
///
/// A static so both calls see stable addresses.
pub static FUNC5_ARGS: [[&CStr; 2]; 2] = [[c"param1", c"param2"], [c"param3", c"param4"]];

/// Leaf taking two opaque C strings; the strings are never read
#[no_mangle]
#[inline(never)]
pub extern "C" fn func1(param1: *const c_char, param2: *const c_char) {
    let _span = tracing::trace_span!(
        "func1",
        param1 = param1 as usize,
        param2 = param2 as usize
    )
    .entered();
    my_sleep();
}

/// Leaf taking one opaque int
#[no_mangle]
#[inline(never)]
pub extern "C" fn func2(param: c_int) {
    let _span = tracing::trace_span!("func2", param).entered();
    my_sleep();
}

/// Leaf taking nothing
#[no_mangle]
#[inline(never)]
pub extern "C" fn func3() {
    let _span = tracing::trace_span!("func3").entered();
    my_sleep();
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn func4() {
    let _span = tracing::trace_span!("func4").entered();
    func2(FUNC2_ARG);
    for _ in 0..FUNC3_REPEAT {
        func3();
    }
}

#[no_mangle]
#[inline(never)]
pub extern "C" fn func5() {
    let _span = tracing::trace_span!("func5").entered();
    let [first, second] = &FUNC5_ARGS;
    func1(first[0].as_ptr(), first[1].as_ptr());
    func1(second[0].as_ptr(), second[1].as_ptr());
}

/// Root of the call tree
#[no_mangle]
#[inline(never)]
pub extern "C" fn func6() {
    let _span = tracing::trace_span!("func6").entered();
    func4();
    func5();
}

/// Fixture entry: runs the tree once and always reports success
pub fn run() -> ExitCode {
    func6();
    ExitCode::SUCCESS
}
