//! Standard-stream wiring for a child about to be spawned.
//!
//! The supervisor reads output through pipes while the sync runner lets the
//! child write into scratch files. Both share the routing rules: a capture
//! sink always uses a scratch file, an external file is handed to the child
//! directly, and redirected stderr duplicates whatever stdout points at.

use std::{
    fs::File,
    io::{self, PipeReader, PipeWriter},
    process::{Command, Stdio},
};

use super::{
    ProcessError, ProcessSpec, StderrPolicy, StdoutSink, command::apply_stdin,
};

/// How intercepted output should reach the parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    /// OS pipes pumped by reader threads.
    Pipes,
    /// Scratch files slurped after the child exits.
    ScratchFiles,
}

/// Parent-side end of one output stream.
#[derive(Debug, Default)]
pub(crate) enum Channel {
    /// Read end of a pipe.
    Pipe(PipeReader),
    /// Scratch file the child writes into.
    Scratch(File),
    /// Nothing to collect (inherited, redirected or external).
    #[default]
    Detached,
}

/// Everything the parent keeps after wiring a command.
#[derive(Debug, Default)]
pub(crate) struct Wiring {
    pub(crate) stdout: Channel,
    pub(crate) stderr: Channel,
    pub(crate) input: Option<String>,
}

enum Target {
    Pipe(PipeWriter),
    File(File),
}

impl Target {
    fn duplicate(&self) -> io::Result<Stdio> {
        match self {
            Self::Pipe(writer) => writer.try_clone().map(Stdio::from),
            Self::File(file) => file.try_clone().map(Stdio::from),
        }
    }

    fn into_stdio(self) -> Stdio {
        match self {
            Self::Pipe(writer) => Stdio::from(writer),
            Self::File(file) => Stdio::from(file),
        }
    }
}

fn scratch(what: &'static str) -> Result<(Channel, Target), ProcessError> {
    let file = tempfile::tempfile().map_err(ProcessError::resource(what))?;
    let child_end = file.try_clone().map_err(ProcessError::resource(what))?;
    Ok((Channel::Scratch(file), Target::File(child_end)))
}

fn pipe(what: &'static str) -> Result<(Channel, Target), ProcessError> {
    let (reader, writer) = io::pipe().map_err(ProcessError::resource(what))?;
    Ok((Channel::Pipe(reader), Target::Pipe(writer)))
}

fn intercept(transport: Transport, what: &'static str) -> Result<(Channel, Target), ProcessError> {
    match transport {
        Transport::Pipes => pipe(what),
        Transport::ScratchFiles => scratch(what),
    }
}

/// Configure stdin, stdout and stderr on `command` according to `spec`.
///
/// The returned channels own the parent ends. The child ends live inside
/// `command`, so it must be dropped after spawning for pipes to reach EOF.
///
/// # Errors
///
/// Returns [`ProcessError::Resource`] when a pipe, scratch file or duplicate
/// descriptor cannot be created.
pub(crate) fn wire(
    spec: &ProcessSpec,
    command: &mut Command,
    transport: Transport,
) -> Result<Wiring, ProcessError> {
    let input = apply_stdin(command, spec.stdin())?;

    let (stdout, target) = match spec.stdout() {
        StdoutSink::Stream => intercept(transport, "stdout pipe")?,
        StdoutSink::Capture => scratch("stdout capture file")?,
        StdoutSink::File(file) => {
            let dup = file
                .try_clone()
                .map_err(ProcessError::resource("stdout file"))?;
            (Channel::Detached, Target::File(dup))
        }
    };

    let stderr = match spec.stderr() {
        StderrPolicy::Intercept => {
            let (channel, stderr_target) = intercept(transport, "stderr pipe")?;
            command.stderr(stderr_target.into_stdio());
            channel
        }
        StderrPolicy::RedirectToStdout => {
            let dup = target
                .duplicate()
                .map_err(ProcessError::resource("stderr redirection"))?;
            command.stderr(dup);
            Channel::Detached
        }
        StderrPolicy::Inherit => {
            command.stderr(Stdio::inherit());
            Channel::Detached
        }
    };
    command.stdout(target.into_stdio());

    Ok(Wiring {
        stdout,
        stderr,
        input,
    })
}
