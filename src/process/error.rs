//! Errors raised while building or running child processes.

use std::{io, path::PathBuf};

use miette::Diagnostic;
use thiserror::Error;

use crate::signals::SignalError;

/// Failures from [`ProcessSpec`](super::ProcessSpec) construction and from
/// launching, supervising or reaping a child.
#[derive(Debug, Error, Diagnostic)]
pub enum ProcessError {
    /// The command line contained no program.
    #[error("command line is empty")]
    #[diagnostic(code(qel::process::empty_command))]
    EmptyCommand,

    /// A quoted section of a command string was never closed.
    #[error("command string has unbalanced quotes: {command}")]
    #[diagnostic(
        code(qel::process::unbalanced_quotes),
        help("close every single or double quote, or escape it with a backslash")
    )]
    UnbalancedQuotes {
        /// Command string as supplied.
        command: String,
    },

    /// A pipe, scratch file or duplicated descriptor could not be created.
    #[error("failed to prepare {what}: {source}")]
    #[diagnostic(code(qel::process::resource))]
    Resource {
        /// Resource being prepared.
        what: &'static str,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// The OS refused to start the program for a reason other than it being
    /// missing or not executable.
    #[error("failed to spawn {program}: {source}")]
    #[diagnostic(code(qel::process::spawn_failed))]
    Spawn {
        /// Program that was launched.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// Waiting for the child to exit failed.
    #[error("failed to reap pid {pid}: {source}")]
    #[diagnostic(code(qel::process::reap_failed))]
    Reap {
        /// Child pid.
        pid: u32,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// A signal could not be delivered.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Signal(#[from] SignalError),

    /// `run` was called while a previous run is still in flight.
    #[error("process {pid} is still running")]
    #[diagnostic(
        code(qel::process::already_running),
        help("wait for the current run to finish before starting another")
    )]
    AlreadyRunning {
        /// Pid of the running child.
        pid: u32,
    },
}

impl ProcessError {
    pub(crate) fn resource(what: &'static str) -> impl FnOnce(io::Error) -> Self {
        move |source| Self::Resource { what, source }
    }
}
