//! Signal taxonomy shared by the supervisor, the sync runner and the killer.
//!
//! Signals are represented by [`nix::sys::signal::Signal`]. This module adds
//! the classification the supervisor needs (which signals terminate a process
//! by default, which can be caught) together with lookups by name or number,
//! a process-global handler registry that can be unwound, and the
//! process-tree walker used by recursive kills.

mod error;
mod registry;
pub mod tree;

pub use error::SignalError;
pub use nix::sys::signal::{SigHandler, Signal};
pub use registry::{RestoreHandler, install_handler};

use std::str::FromStr;

/// Name, number and classification of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SignalInfo {
    /// The signal itself.
    pub signal: Signal,
    /// Canonical name, e.g. `SIGTERM`.
    pub name: &'static str,
    /// Platform signal number.
    pub number: i32,
    /// Whether the default disposition terminates the process.
    pub termination: bool,
    /// Whether a handler can be installed for the signal.
    pub catchable: bool,
}

impl SignalInfo {
    /// Describe `signal`.
    #[must_use]
    pub fn of(signal: Signal) -> Self {
        Self {
            signal,
            name: signal.as_str(),
            number: signal as i32,
            termination: is_termination(signal),
            catchable: is_catchable(signal),
        }
    }
}

/// Every signal known to the platform, in ascending numeric order.
#[must_use]
pub fn registry() -> Vec<SignalInfo> {
    let mut all: Vec<SignalInfo> = Signal::iterator().map(SignalInfo::of).collect();
    all.sort_by_key(|info| info.number);
    all
}

/// Canonical name for a signal number.
///
/// # Examples
/// ```
/// assert_eq!(qel::signals::signal_name(15), Some("SIGTERM"));
/// assert_eq!(qel::signals::signal_name(0), None);
/// ```
#[must_use]
pub fn signal_name(number: i32) -> Option<&'static str> {
    Signal::try_from(number).ok().map(Signal::as_str)
}

/// Resolve `TERM`, `SIGTERM`, `sigterm` or `15` to a signal.
///
/// # Examples
/// ```
/// use qel::signals::{Signal, signal_from_name};
/// assert_eq!(signal_from_name("term"), Some(Signal::SIGTERM));
/// assert_eq!(signal_from_name("SIGKILL"), Some(Signal::SIGKILL));
/// assert_eq!(signal_from_name("9"), Some(Signal::SIGKILL));
/// assert_eq!(signal_from_name("nope"), None);
/// ```
#[must_use]
pub fn signal_from_name(name: &str) -> Option<Signal> {
    let trimmed = name.trim();
    if let Ok(number) = trimmed.parse::<i32>() {
        return Signal::try_from(number).ok();
    }
    let upper = trimmed.to_ascii_uppercase();
    if upper.starts_with("SIG") {
        Signal::from_str(&upper).ok()
    } else {
        Signal::from_str(&format!("SIG{upper}")).ok()
    }
}

/// Whether the default disposition of `signal` terminates the process.
///
/// The recursive killer freezes a process tree before delivering one of
/// these so nothing can fork while the tree is torn down.
#[must_use]
pub const fn is_termination(signal: Signal) -> bool {
    matches!(
        signal,
        Signal::SIGHUP
            | Signal::SIGINT
            | Signal::SIGQUIT
            | Signal::SIGABRT
            | Signal::SIGKILL
            | Signal::SIGPIPE
            | Signal::SIGALRM
            | Signal::SIGTERM
            | Signal::SIGUSR1
            | Signal::SIGUSR2
    )
}

/// Whether a process can catch, block or ignore `signal`.
#[must_use]
pub const fn is_catchable(signal: Signal) -> bool {
    !matches!(signal, Signal::SIGKILL | Signal::SIGSTOP)
}
