//! Live tracing through the bcc `trace` tool
//!
//! Spawns `{bcc_command} {trace_flags...} {probe args...}` and feeds every
//! completed stack from its stdout into a shared [`CallGraph`] while it runs.
//! The tracer gets its own process group so that stopping it also stops any
//! helper processes still holding its stdout.

use crate::call_graph::CallGraph;
use crate::config::CalltreeConfig;
use crate::stack_parser::parse_stack;
use crate::trace_output::{Delimiter, StackReader};
use anyhow::{bail, Context, Result};
use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use std::io::BufReader;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

/// Reported when the tracer exits while it is still supposed to run
pub const STOPPED_UNEXPECTEDLY: &str = "Tracing stopped unexpectedly";

fn lock(graph: &Mutex<CallGraph>) -> MutexGuard<'_, CallGraph> {
    graph.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// A running bcc `trace` process and the thread consuming its output
pub struct TraceRunner {
    child: Child,
    enabled: Arc<AtomicBool>,
    error: Arc<Mutex<Option<String>>>,
    monitor: Option<JoinHandle<()>>,
}

impl TraceRunner {
    /// Start tracing `functions` (probe arguments from [`crate::trace_setup`])
    pub fn start(
        config: &CalltreeConfig,
        functions: &[String],
        graph: Arc<Mutex<CallGraph>>,
    ) -> Result<Self> {
        if functions.is_empty() {
            bail!("No functions to trace");
        }

        tracing::debug!(
            command = %config.bcc_command,
            flags = ?config.trace_flags,
            ?functions,
            "spawning tracer"
        );
        let mut child = Command::new(&config.bcc_command)
            .args(&config.trace_flags)
            .args(functions)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .process_group(0)
            .spawn()
            .with_context(|| format!("Failed to start {}", config.bcc_command))?;
        tracing::debug!(pid = child.id(), "tracer started");

        let stdout = child
            .stdout
            .take()
            .context("Tracer stdout was not captured")?;
        let enabled = Arc::new(AtomicBool::new(true));
        let error = Arc::new(Mutex::new(None));

        let monitor = {
            let enabled = Arc::clone(&enabled);
            let error = Arc::clone(&error);
            thread::Builder::new()
                .name("calltree-monitor".to_string())
                .spawn(move || monitor_tracing(stdout, &graph, &enabled, &error))
                .context("Failed to spawn monitor thread")?
        };

        Ok(Self {
            child,
            enabled,
            error,
            monitor: Some(monitor),
        })
    }

    /// Whether the tracer is still expected to be running
    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Last error seen by the monitor thread
    pub fn error(&self) -> Option<String> {
        self.error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Terminate the tracer and wait for the monitor to drain its output
    pub fn stop(&mut self) -> Result<()> {
        let Some(monitor) = self.monitor.take() else {
            return Ok(());
        };
        self.enabled.store(false, Ordering::SeqCst);

        let pid = Pid::from_raw(self.child.id() as i32);
        match killpg(pid, Signal::SIGTERM) {
            Ok(()) | Err(Errno::ESRCH) => {}
            Err(errno) => tracing::debug!(%pid, %errno, "failed to signal tracer"),
        }
        let status = self.child.wait().context("Failed to wait for tracer")?;
        tracing::debug!(%pid, ?status, "tracer exited");

        if monitor.join().is_err() {
            bail!("Monitor thread panicked");
        }
        Ok(())
    }
}

impl Drop for TraceRunner {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            tracing::debug!(%err, "failed to stop tracer on drop");
        }
    }
}

fn monitor_tracing(
    stdout: ChildStdout,
    graph: &Mutex<CallGraph>,
    enabled: &AtomicBool,
    error: &Mutex<Option<String>>,
) {
    let reader = StackReader::new(BufReader::new(stdout), Delimiter::DoubleBlankLine);

    for block in reader {
        let block = match block {
            Ok(block) => block,
            Err(err) => {
                tracing::debug!(%err, "failed to read tracer output");
                break;
            }
        };
        let stack = parse_stack(&block);
        if stack.is_empty() {
            continue;
        }

        let mut graph = lock(graph);
        graph.load_stack(&stack);
        graph.init_colors();
        tracing::trace!(nodes = graph.nodes().len(), "merged stack");
    }

    // Output only ends early if the tracer died on its own
    if enabled.swap(false, Ordering::SeqCst) {
        tracing::warn!("{}", STOPPED_UNEXPECTEDLY);
        *error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(STOPPED_UNEXPECTEDLY.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, Instant};

    const LIVE_OUTPUT: &str = "\
PID     TID     COMM            FUNC             -
77      77      test_application func2            3

        b'func2+0x0 [test_application]'
        b'func6+0x1a [test_application]'


77      77      test_application func3

        b'func3+0x0 [test_application]'
        b'func6+0x1f [test_application]'


";

    fn shell_config(script: String) -> CalltreeConfig {
        CalltreeConfig {
            bcc_command: "sh".to_string(),
            trace_flags: vec!["-c".to_string(), script],
            colors: None,
        }
    }

    fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + Duration::from_secs(10);
        while Instant::now() < deadline {
            if condition() {
                return true;
            }
            thread::sleep(Duration::from_millis(20));
        }
        false
    }

    #[test]
    fn test_no_functions() {
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let err = TraceRunner::start(&CalltreeConfig::default(), &[], graph)
            .err()
            .unwrap();
        assert!(err.to_string().contains("No functions to trace"));
    }

    #[test]
    fn test_missing_command() {
        let config = CalltreeConfig {
            bcc_command: "/nonexistent/trace-bpfcc".to_string(),
            ..CalltreeConfig::default()
        };
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        assert!(TraceRunner::start(&config, &["func1".to_string()], graph).is_err());
    }

    #[test]
    fn test_streams_stacks_until_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("live.txt");
        std::fs::write(&output, LIVE_OUTPUT).unwrap();

        let config = shell_config(format!("cat '{}'; exec sleep 30", output.display()));
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let mut runner =
            TraceRunner::start(&config, &["func2".to_string()], Arc::clone(&graph)).unwrap();

        assert!(wait_until(|| lock(&graph).nodes().len() == 3));
        runner.stop().unwrap();

        assert!(!runner.is_enabled());
        assert_eq!(runner.error(), None);
        let graph = lock(&graph);
        assert_eq!(graph.node_by_name("func2").unwrap().1.call_count, 1);
        assert_eq!(graph.node_by_name("func3").unwrap().1.call_count, 1);
        assert_eq!(graph.node_by_name("func6").unwrap().1.call_count, 0);
        assert_eq!((graph.yellow(), graph.red()), (0, 0));
    }

    #[test]
    fn test_stop_terminates_helper_processes() {
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("live.txt");
        std::fs::write(&output, LIVE_OUTPUT).unwrap();

        // No exec: the shell's sleep child inherits the stdout pipe
        let config = shell_config(format!("cat '{}'; sleep 30", output.display()));
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let mut runner =
            TraceRunner::start(&config, &["func2".to_string()], Arc::clone(&graph)).unwrap();
        assert!(wait_until(|| lock(&graph).nodes().len() == 3));

        let start = Instant::now();
        runner.stop().unwrap();
        assert!(start.elapsed() < Duration::from_secs(10));
        assert_eq!(runner.error(), None);
    }

    #[test]
    fn test_reports_unexpected_exit() {
        let config = shell_config("exit 0".to_string());
        let graph = Arc::new(Mutex::new(CallGraph::new()));
        let mut runner = TraceRunner::start(&config, &["func1".to_string()], graph).unwrap();

        assert!(wait_until(|| runner.error().is_some()));
        assert_eq!(runner.error().as_deref(), Some(STOPPED_UNEXPECTEDLY));
        runner.stop().unwrap();
    }
}
