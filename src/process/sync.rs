//! Blocking runner: spawn, wait, read back scratch files.

use std::process::Child;

use tracing::{debug, warn};
use wait_timeout::ChildExt;

use super::{
    ProcessError, ProcessSpec, ProcessState, StderrPolicy, StdoutSink,
    command::{EXIT_NOT_FOUND, build_command, spawn_failure},
    output::{NOT_FOUND_MESSAGE, finish_output, read_back, rewind},
    pipes::{join_stdin_writer, spawn_stdin_writer},
    wiring::{Channel, Transport, wire},
};
use crate::kill::send_signal;

/// Result of a blocking run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessOutput {
    /// Final state of the child.
    pub state: ProcessState,
    /// Captured stdout after blank-line suppression and trimming.
    pub stdout: String,
    /// Captured stderr after blank-line suppression and trimming.
    pub stderr: String,
}

/// Run `spec` to completion.
///
/// Intercepted output is written to scratch files that are slurped once the
/// child exits. When a timeout is configured and elapses, the timeout signal
/// is delivered and the child is then reaped.
///
/// # Examples
/// ```
/// use qel::process::{ProcessSpec, run_sync};
///
/// let spec = ProcessSpec::new(["cat"])?.with_input("hello\n").with_trim(true);
/// let output = run_sync(&spec)?;
/// assert_eq!(output.stdout, "hello");
/// assert_eq!(output.state.exit_code, Some(0));
/// # Ok::<(), qel::process::ProcessError>(())
/// ```
///
/// # Errors
///
/// Returns [`ProcessError::Resource`] when scratch files cannot be created,
/// [`ProcessError::Spawn`] for spawn failures other than a missing or
/// non-executable program and [`ProcessError::Reap`] when waiting fails.
pub fn run_sync(spec: &ProcessSpec) -> Result<ProcessOutput, ProcessError> {
    let mut command = build_command(spec);
    let wiring = wire(spec, &mut command, Transport::ScratchFiles)?;
    let spawned = command.spawn();
    drop(command);

    let mut output = ProcessOutput::default();
    match spawned {
        Ok(mut child) => {
            let pid = child.id();
            debug!(pid, "spawned child");
            output.state = ProcessState::started(pid);
            let writer = match (child.stdin.take(), wiring.input) {
                (Some(stdin), Some(text)) => Some(spawn_stdin_writer(stdin, text)),
                _ => None,
            };
            wait_for_exit(spec, &mut child, &mut output.state)?;
            join_stdin_writer(writer);
            output.stdout = slurp(&wiring.stdout, "stdout");
            output.stderr = slurp(&wiring.stderr, "stderr");
            if let StdoutSink::File(file) = spec.stdout() {
                rewind(file);
            }
        }
        Err(err) => {
            output.state.exit_code = Some(spawn_failure(spec, err)?);
        }
    }

    output.stdout = finish_output(output.stdout, spec.skip_blank_lines(), spec.trim());
    output.stderr = finish_output(output.stderr, spec.skip_blank_lines(), spec.trim());
    if output.state.exit_code == Some(EXIT_NOT_FOUND) {
        let channel = match spec.stderr() {
            StderrPolicy::RedirectToStdout => &mut output.stdout,
            StderrPolicy::Intercept | StderrPolicy::Inherit => &mut output.stderr,
        };
        if channel.is_empty() {
            channel.push_str(NOT_FOUND_MESSAGE);
        }
    }
    Ok(output)
}

fn wait_for_exit(
    spec: &ProcessSpec,
    child: &mut Child,
    state: &mut ProcessState,
) -> Result<(), ProcessError> {
    let pid = child.id();
    let reap_error = |source: std::io::Error| ProcessError::Reap { pid, source };
    let status = match spec.timeout() {
        Some(timeout) => {
            if let Some(status) = child.wait_timeout(timeout).map_err(reap_error)? {
                status
            } else {
                state.timed_out = true;
                debug!(pid, signal = %spec.timeout_signal(), "timeout elapsed");
                send_signal(pid, spec.timeout_signal())?;
                child.wait().map_err(reap_error)?
            }
        }
        None => child.wait().map_err(reap_error)?,
    };
    state.record_exit(status);
    Ok(())
}

fn slurp(channel: &Channel, label: &'static str) -> String {
    let Channel::Scratch(file) = channel else {
        return String::new();
    };
    read_back(file).unwrap_or_else(|err| {
        warn!(stream = label, %err, "failed to read scratch file");
        String::new()
    })
}
