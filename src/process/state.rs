//! Outcome of a child process run.

use std::{os::unix::process::ExitStatusExt, process::ExitStatus};

use crate::signals::signal_name;

/// Observable state of a supervised child.
///
/// `exit_code` is `None` until the child has been reaped. A non-negative code
/// is a normal exit status; a negative code is the negated number of the
/// signal that terminated the child, and `signal` then carries its name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessState {
    /// Child pid, `0` before the child starts or when it never started.
    pub pid: u32,
    /// Exit status, or the negated terminating signal number.
    pub exit_code: Option<i32>,
    /// Whether the timeout fired.
    pub timed_out: bool,
    /// Name of the terminating signal, e.g. `SIGTERM`.
    pub signal: Option<String>,
}

impl ProcessState {
    /// Fresh state for a child that has just started.
    #[must_use]
    pub const fn started(pid: u32) -> Self {
        Self {
            pid,
            exit_code: None,
            timed_out: false,
            signal: None,
        }
    }

    /// Record the decoded wait status.
    pub fn record_exit(&mut self, status: ExitStatus) {
        if let Some(code) = status.code() {
            self.exit_code = Some(code);
            self.signal = None;
        } else if let Some(number) = status.signal() {
            self.exit_code = Some(-number);
            self.signal = signal_name(number).map(str::to_owned);
        }
    }

    /// Whether the child has been reaped.
    #[must_use]
    pub const fn is_finished(&self) -> bool {
        self.exit_code.is_some()
    }

    /// Whether the child exited normally with status zero.
    #[must_use]
    pub const fn success(&self) -> bool {
        matches!(self.exit_code, Some(0))
    }

    /// Number of the signal that terminated the child, if any.
    #[must_use]
    pub fn terminating_signal(&self) -> Option<i32> {
        self.exit_code.filter(|code| *code < 0).map(i32::wrapping_neg)
    }

    /// Exit status in shell convention: signals map to `128 + n`.
    ///
    /// # Examples
    /// ```
    /// use qel::process::ProcessState;
    ///
    /// let mut state = ProcessState::started(42);
    /// state.exit_code = Some(-15);
    /// assert_eq!(state.shell_exit_code(), 143);
    /// ```
    #[must_use]
    pub fn shell_exit_code(&self) -> i32 {
        match self.exit_code {
            Some(code) if code >= 0 => code,
            Some(code) => 128_i32.saturating_sub(code),
            None => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normal_exit_is_recorded() {
        let mut state = ProcessState::started(7);
        state.record_exit(ExitStatus::from_raw(3 << 8));
        assert_eq!(state.exit_code, Some(3));
        assert!(state.signal.is_none());
        assert!(state.is_finished());
        assert!(!state.success());
        assert_eq!(state.shell_exit_code(), 3);
    }

    #[test]
    fn signal_exit_is_negated_and_named() {
        let mut state = ProcessState::started(7);
        state.record_exit(ExitStatus::from_raw(9));
        assert_eq!(state.exit_code, Some(-9));
        assert_eq!(state.signal.as_deref(), Some("SIGKILL"));
        assert_eq!(state.terminating_signal(), Some(9));
        assert_eq!(state.shell_exit_code(), 137);
    }

    #[test]
    fn unfinished_state_reports_nothing() {
        let state = ProcessState::default();
        assert_eq!(state.pid, 0);
        assert!(!state.is_finished());
        assert_eq!(state.terminating_signal(), None);
    }
}
