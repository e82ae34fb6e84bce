//! Fixed-interval monotonic timed wait
//!
//! The only blocking primitive in the call-tree fixture. Each call issues a
//! single relative `clock_nanosleep(CLOCK_MONOTONIC)` for [`SLEEP_INTERVAL`].
//!
//! A wait interrupted by a signal handler returns early and is NOT resumed:
//! the remaining time is dropped, leaving exactly one clock call per leaf.

use nix::errno::Errno;
use nix::sys::time::TimeSpec;
use nix::time::{clock_nanosleep, ClockId, ClockNanosleepFlags};
use std::time::Duration;

/// Length of every timed wait: 0 s + 100 000 000 ns
pub const SLEEP_INTERVAL: Duration = Duration::from_nanos(100_000_000);

/// How a single clock call ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Slept for the full interval
    Completed,
    /// Woken early by a signal handler (EINTR)
    Interrupted,
    /// The clock call itself was rejected
    Failed(Errno),
}

/// Sleep once for [`SLEEP_INTERVAL`] on the monotonic clock
pub fn timed_wait() -> WaitOutcome {
    let request = TimeSpec::from_duration(SLEEP_INTERVAL);

    match clock_nanosleep(
        ClockId::CLOCK_MONOTONIC,
        ClockNanosleepFlags::empty(),
        &request,
    ) {
        Ok(_) => WaitOutcome::Completed,
        Err(Errno::EINTR) => WaitOutcome::Interrupted,
        Err(errno) => WaitOutcome::Failed(errno),
    }
}

/// Leaf sleep shared by every fixture function
///
/// Unmangled and never inlined so a uprobe can attach to `my_sleep`.
#[no_mangle]
#[inline(never)]
pub extern "C" fn my_sleep() {
    let _span = tracing::trace_span!("my_sleep").entered();

    let outcome = timed_wait();
    if outcome != WaitOutcome::Completed {
        tracing::trace!(?outcome, "timed wait ended early, remainder dropped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::pthread::{pthread_kill, pthread_self};
    use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
    use std::thread;
    use std::time::Instant;

    extern "C" fn ignore_signal(_: libc::c_int) {}

    #[test]
    fn test_sleep_interval_is_100ms() {
        assert_eq!(SLEEP_INTERVAL.as_secs(), 0);
        assert_eq!(SLEEP_INTERVAL.subsec_nanos(), 100_000_000);
    }

    #[test]
    fn test_timed_wait_completes_full_interval() {
        let start = Instant::now();
        let outcome = timed_wait();
        let elapsed = start.elapsed();

        assert_eq!(outcome, WaitOutcome::Completed);
        assert!(elapsed >= SLEEP_INTERVAL, "slept only {:?}", elapsed);
    }

    #[test]
    fn test_my_sleep_blocks_at_least_interval() {
        let start = Instant::now();
        my_sleep();
        assert!(start.elapsed() >= SLEEP_INTERVAL);
    }

    #[test]
    fn test_interrupted_wait_is_not_resumed() {
        // A no-op handler turns SIGUSR1 into a plain EINTR wake-up
        let action = SigAction::new(
            SigHandler::Handler(ignore_signal),
            SaFlags::empty(),
            SigSet::empty(),
        );
        unsafe { sigaction(Signal::SIGUSR1, &action) }.expect("install SIGUSR1 handler");

        let sleeper = pthread_self();
        let interrupter = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            pthread_kill(sleeper, Signal::SIGUSR1).expect("signal sleeping thread");
        });

        let start = Instant::now();
        let outcome = timed_wait();
        let elapsed = start.elapsed();
        interrupter.join().unwrap();

        assert_eq!(outcome, WaitOutcome::Interrupted);
        assert!(elapsed < SLEEP_INTERVAL, "wait was resumed: {:?}", elapsed);
    }
}
