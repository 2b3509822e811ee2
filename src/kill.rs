//! Signal delivery to single processes and whole process trees.
//!
//! A recursive kill of a termination signal runs in three phases:
//!
//! 1. `SIGSTOP` the target, then every discovered descendant, so nothing in
//!    the tree can fork while it is being torn down.
//! 2. Deliver the requested signal to descendants in reverse discovery order
//!    (leaves first), then to the target.
//! 3. `SIGCONT` every stopped process so a catchable signal is acted upon.
//!    `SIGKILL` needs no `SIGCONT` and never gets one.
//!
//! The phase logic is written against injected `walk` and `send` closures so it
//! can be exercised without touching real processes.

use std::{thread, time::Duration};

use nix::{sys::signal, unistd::Pid};
use tracing::debug;

use crate::signals::{Signal, SignalError, is_catchable, is_termination, tree};

/// How a kill request should be delivered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KillOptions {
    /// Signal to deliver.
    pub signal: Signal,
    /// Deliver to every descendant as well, leaves first.
    pub recursive: bool,
}

impl KillOptions {
    /// Deliver `signal` to the target only.
    #[must_use]
    pub const fn new(signal: Signal) -> Self {
        Self {
            signal,
            recursive: false,
        }
    }

    /// Deliver `signal` to the target and all of its descendants.
    #[must_use]
    pub const fn recursive(signal: Signal) -> Self {
        Self {
            signal,
            recursive: true,
        }
    }
}

impl Default for KillOptions {
    fn default() -> Self {
        Self::new(Signal::SIGTERM)
    }
}

/// Send `signal` to `pid`.
///
/// # Errors
///
/// Returns [`SignalError::Delivery`] when `kill(2)` fails and
/// [`SignalError::InvalidPid`] when `pid` does not fit in `pid_t`.
pub fn send_signal(pid: u32, signal: Signal) -> Result<(), SignalError> {
    let raw = i32::try_from(pid).map_err(|_| SignalError::InvalidPid { pid })?;
    debug!(pid, %signal, "sending signal");
    signal::kill(Pid::from_raw(raw), signal).map_err(|source| SignalError::Delivery {
        pid,
        signal,
        source,
    })
}

/// Deliver a kill request to a live process.
///
/// `paused` tells the killer that the target was stopped by the caller, so a
/// catchable termination signal must be followed by `SIGCONT` to take effect.
///
/// # Errors
///
/// Returns an error when the signal cannot be delivered to the target itself.
/// Failures on descendants (which may exit mid-walk) are logged and skipped.
pub fn kill_process(pid: u32, options: KillOptions, paused: bool) -> Result<(), SignalError> {
    if options.recursive {
        kill_tree_with(pid, options.signal, tree::descendants, send_signal)
    } else {
        kill_single_with(pid, options.signal, paused, send_signal)
    }
}

/// Non-recursive kill: signal, then `SIGCONT` if the target was paused and the
/// signal is a catchable termination signal.
///
/// # Errors
///
/// Propagates the first delivery failure from `send`.
pub fn kill_single_with<S>(
    pid: u32,
    signal: Signal,
    paused: bool,
    mut send: S,
) -> Result<(), SignalError>
where
    S: FnMut(u32, Signal) -> Result<(), SignalError>,
{
    send(pid, signal)?;
    if paused && needs_continue(signal) {
        send(pid, Signal::SIGCONT)?;
    }
    Ok(())
}

/// Recursive kill of `pid` and every process `walk` reports beneath it.
///
/// # Errors
///
/// Propagates delivery failures on the target; descendant failures are
/// tolerated.
pub fn kill_tree_with<W, S>(
    pid: u32,
    signal: Signal,
    walk: W,
    mut send: S,
) -> Result<(), SignalError>
where
    W: FnOnce(u32) -> Vec<u32>,
    S: FnMut(u32, Signal) -> Result<(), SignalError>,
{
    let freeze = is_termination(signal);
    let mut stopped = Vec::new();
    if freeze {
        send(pid, Signal::SIGSTOP)?;
        stopped.push(pid);
    }

    let descendants = walk(pid);
    if freeze {
        for &child in &descendants {
            if deliver_to_descendant(&mut send, child, Signal::SIGSTOP) {
                stopped.push(child);
            }
        }
    }

    for &child in descendants.iter().rev() {
        deliver_to_descendant(&mut send, child, signal);
    }
    send(pid, signal)?;

    if needs_continue(signal) {
        for &target in stopped.iter().rev() {
            if target == pid {
                send(target, Signal::SIGCONT)?;
            } else {
                deliver_to_descendant(&mut send, target, Signal::SIGCONT);
            }
        }
    }
    Ok(())
}

fn deliver_to_descendant<S>(send: &mut S, pid: u32, signal: Signal) -> bool
where
    S: FnMut(u32, Signal) -> Result<(), SignalError>,
{
    match send(pid, signal) {
        Ok(()) => true,
        Err(err) => {
            debug!(pid, %signal, %err, "skipping descendant");
            false
        }
    }
}

const fn needs_continue(signal: Signal) -> bool {
    is_termination(signal) && is_catchable(signal)
}

/// Block until a foreign `pid` disappears, probing with `kill(pid, 0)` every
/// `poll_delay`.
///
/// This is a best-effort wait for processes the caller did not spawn and so
/// cannot reap. A zombie still answers the probe until its parent reaps it.
pub fn wait_for_pid(pid: u32, poll_delay: Duration) {
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    while signal::kill(Pid::from_raw(raw), None).is_ok() {
        thread::sleep(poll_delay);
    }
}
