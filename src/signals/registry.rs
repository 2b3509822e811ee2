//! Process-global signal handler registry.
//!
//! There is exactly one OS disposition per signal, but callers want to install
//! a handler temporarily and later put back whatever was there before. The
//! registry records `(signal, previous action)` entries on a stack and hands
//! each installer a [`RestoreHandler`] that unwinds its own entry. Only one
//! registry-managed handler may be active per signal at a time.

use std::sync::{Mutex, PoisonError};

use nix::sys::signal::{SaFlags, SigAction, SigHandler, SigSet, Signal, sigaction};
use tracing::debug;

use super::SignalError;

struct Installed {
    id: u64,
    signal: Signal,
    previous: SigAction,
}

struct Registry {
    next_id: u64,
    stack: Vec<Installed>,
}

static REGISTRY: Mutex<Registry> = Mutex::new(Registry {
    next_id: 0,
    stack: Vec::new(),
});

/// Install `handler` for `signal`, remembering the previous disposition.
///
/// # Errors
///
/// Returns [`SignalError::AlreadyInstalled`] when the registry already holds a
/// handler for `signal`, or [`SignalError::Install`] when the OS refuses the
/// disposition (for example for `SIGKILL`).
pub fn install_handler(signal: Signal, handler: SigHandler) -> Result<RestoreHandler, SignalError> {
    let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
    if registry.stack.iter().any(|entry| entry.signal == signal) {
        return Err(SignalError::AlreadyInstalled { signal });
    }
    let action = SigAction::new(handler, SaFlags::SA_RESTART, SigSet::empty());
    // SAFETY: the handler is supplied by the caller, who is responsible for it
    // being async-signal-safe; replacing a disposition has no other
    // preconditions.
    let previous = unsafe { sigaction(signal, &action) }
        .map_err(|source| SignalError::Install { signal, source })?;
    let id = registry.next_id;
    registry.next_id += 1;
    registry.stack.push(Installed {
        id,
        signal,
        previous,
    });
    debug!(%signal, "installed signal handler");
    Ok(RestoreHandler {
        id,
        signal,
        restored: false,
    })
}

/// Unwinds a handler installed by [`install_handler`].
///
/// Dropping the guard restores the previous disposition too; call
/// [`RestoreHandler::restore`] to observe failures.
#[derive(Debug)]
#[must_use = "dropping the guard immediately restores the previous handler"]
pub struct RestoreHandler {
    id: u64,
    signal: Signal,
    restored: bool,
}

impl RestoreHandler {
    /// Signal this guard manages.
    pub const fn signal(&self) -> Signal {
        self.signal
    }

    /// Put back the disposition that was active before installation.
    ///
    /// # Errors
    ///
    /// Returns [`SignalError::Install`] when the OS rejects the restored
    /// disposition.
    pub fn restore(mut self) -> Result<(), SignalError> {
        self.restore_inner()
    }

    fn restore_inner(&mut self) -> Result<(), SignalError> {
        if self.restored {
            return Ok(());
        }
        self.restored = true;
        let mut registry = REGISTRY.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(position) = registry.stack.iter().position(|entry| entry.id == self.id) else {
            return Ok(());
        };
        let entry = registry.stack.remove(position);
        // SAFETY: `previous` was returned by `sigaction` for this very signal.
        unsafe { sigaction(entry.signal, &entry.previous) }.map_err(|source| {
            SignalError::Install {
                signal: entry.signal,
                source,
            }
        })?;
        debug!(signal = %entry.signal, "restored signal handler");
        Ok(())
    }
}

impl Drop for RestoreHandler {
    fn drop(&mut self) {
        if let Err(err) = self.restore_inner() {
            tracing::warn!(%err, "failed to restore signal handler");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial(signal_registry)]
    fn second_install_for_same_signal_is_rejected() {
        let guard =
            install_handler(Signal::SIGUSR2, SigHandler::SigIgn).expect("first install succeeds");
        let err = install_handler(Signal::SIGUSR2, SigHandler::SigIgn)
            .expect_err("second install must fail");
        assert!(matches!(
            err,
            SignalError::AlreadyInstalled {
                signal: Signal::SIGUSR2
            }
        ));
        guard.restore().expect("restore succeeds");
        let again =
            install_handler(Signal::SIGUSR2, SigHandler::SigIgn).expect("slot free after restore");
        drop(again);
    }

    #[test]
    #[serial(signal_registry)]
    fn restore_puts_back_previous_disposition() {
        let outer = install_handler(Signal::SIGUSR1, SigHandler::SigIgn).expect("install");
        outer.restore().expect("restore");
        // SAFETY: querying by installing the default and immediately putting
        // the returned action back.
        let current = unsafe {
            sigaction(
                Signal::SIGUSR1,
                &SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty()),
            )
        }
        .expect("query disposition");
        assert_eq!(current.handler(), SigHandler::SigDfl);
    }

    #[test]
    fn uncatchable_signals_cannot_be_installed() {
        let err = install_handler(Signal::SIGKILL, SigHandler::SigIgn)
            .expect_err("SIGKILL cannot be handled");
        assert!(matches!(err, SignalError::Install { .. }));
    }
}
