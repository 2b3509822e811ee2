//! Errors raised while delivering signals or managing handlers.

use miette::Diagnostic;
use nix::{errno::Errno, sys::signal::Signal};
use thiserror::Error;

/// Failures from signal delivery and the handler registry.
#[derive(Debug, Error, Diagnostic)]
pub enum SignalError {
    /// The pid does not fit the platform's `pid_t`.
    #[error("pid {pid} is out of range")]
    #[diagnostic(code(qel::signals::invalid_pid))]
    InvalidPid {
        /// Offending pid.
        pid: u32,
    },

    /// `kill(2)` failed.
    #[error("failed to send {signal} to pid {pid}: {source}")]
    #[diagnostic(code(qel::signals::delivery_failed))]
    Delivery {
        /// Target pid.
        pid: u32,
        /// Signal that could not be delivered.
        signal: Signal,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },

    /// A handler for the signal is already installed through the registry.
    #[error("a handler for {signal} is already installed")]
    #[diagnostic(
        code(qel::signals::already_installed),
        help("restore the previous handler before installing another one")
    )]
    AlreadyInstalled {
        /// Signal whose slot is occupied.
        signal: Signal,
    },

    /// `sigaction(2)` rejected the handler.
    #[error("failed to install a handler for {signal}: {source}")]
    #[diagnostic(code(qel::signals::install_failed))]
    Install {
        /// Signal being configured.
        signal: Signal,
        /// Underlying OS error.
        #[source]
        source: Errno,
    },
}

impl SignalError {
    /// Whether the failure means the target process no longer exists.
    #[must_use]
    pub const fn is_no_such_process(&self) -> bool {
        matches!(
            self,
            Self::Delivery {
                source: Errno::ESRCH,
                ..
            }
        )
    }
}
