//! Argument-vector assembly and `Command` construction shared by the
//! supervisor and the sync runner.

use std::{
    ffi::OsString,
    io,
    os::unix::process::CommandExt,
    process::{Command, Stdio},
};

use itertools::Itertools;
use shell_quote::{QuoteRefExt, Sh};
use tracing::info;

use super::{EnvMode, ProcessError, ProcessSpec, StdinSource};
use crate::redaction::redacted_command_line;

/// Exit code reported when the program could not be found.
pub const EXIT_NOT_FOUND: i32 = 127;
/// Exit code reported when the program exists but cannot be executed.
pub const EXIT_NOT_EXECUTABLE: i32 = 126;

/// Build the full argument vector: `[setsid] [shell -c script | argv...]`.
///
/// # Examples
/// ```
/// use qel::process::{ProcessSpec, launch_argv};
///
/// let spec = ProcessSpec::new(["echo", "a b"])?.with_shell(true);
/// let argv = launch_argv(&spec);
/// assert_eq!(argv.get(..2), Some(&["/bin/sh".to_owned(), "-c".to_owned()][..]));
/// let script = argv.get(2).and_then(|script| shlex::split(script));
/// assert_eq!(script, Some(vec!["echo".to_owned(), "a b".to_owned()]));
/// # Ok::<(), qel::process::ProcessError>(())
/// ```
#[must_use]
pub fn launch_argv(spec: &ProcessSpec) -> Vec<String> {
    let mut argv = Vec::with_capacity(spec.argv().len() + 3);
    if spec.new_session() {
        argv.push(spec.setsid_path().to_string_lossy().into_owned());
    }
    if spec.shell() {
        argv.push(spec.shell_path().to_string_lossy().into_owned());
        argv.push(String::from("-c"));
        argv.push(shell_script(spec));
    } else {
        argv.extend(spec.argv().iter().cloned());
    }
    argv
}

fn shell_script(spec: &ProcessSpec) -> String {
    if let Some(line) = spec.command_line() {
        return line.to_owned();
    }
    spec.argv().iter().map(|arg| quote(arg)).join(" ")
}

fn quote(arg: &str) -> String {
    let bytes: Vec<u8> = arg.quoted(Sh);
    match String::from_utf8(bytes) {
        Ok(text) => text,
        Err(err) => {
            debug_assert!(false, "quoting a &str must stay UTF-8: {err}");
            String::from_utf8_lossy(err.as_bytes()).into_owned()
        }
    }
}

/// Create a `Command` for `spec` with working directory, credentials and
/// environment applied. Standard streams are left to the caller.
#[must_use]
pub(crate) fn build_command(spec: &ProcessSpec) -> Command {
    let argv = launch_argv(spec);
    info!(command = %redacted_command_line(&argv), "running command");
    let mut iter = argv.into_iter().map(OsString::from);
    let program = iter.next().unwrap_or_default();
    let mut command = Command::new(program);
    command.args(iter);
    if let Some(dir) = spec.cwd() {
        command.current_dir(dir);
    }
    if let Some(gid) = spec.gid() {
        command.gid(gid);
    }
    if let Some(uid) = spec.uid() {
        command.uid(uid);
    }
    if spec.env().mode == EnvMode::Replace {
        command.env_clear();
    }
    command.envs(&spec.env().vars);
    command
}

/// Configure the child's stdin and return the text to feed it, if any.
///
/// # Errors
///
/// Fails when a file source cannot be duplicated.
pub(crate) fn apply_stdin(
    command: &mut Command,
    source: &StdinSource,
) -> Result<Option<String>, ProcessError> {
    match source {
        StdinSource::Inherit => {
            command.stdin(Stdio::inherit());
            Ok(None)
        }
        StdinSource::Null => {
            command.stdin(Stdio::null());
            Ok(None)
        }
        StdinSource::File(file) => {
            let dup = file
                .try_clone()
                .map_err(ProcessError::resource("stdin file"))?;
            command.stdin(Stdio::from(dup));
            Ok(None)
        }
        StdinSource::Text(text) => {
            command.stdin(Stdio::piped());
            Ok(Some(text.clone()))
        }
    }
}

/// Map a spawn failure to the exit code a shell would have reported, when
/// there is one.
pub(crate) fn spawn_exit_code(err: &io::Error) -> Option<i32> {
    match err.kind() {
        io::ErrorKind::NotFound => Some(EXIT_NOT_FOUND),
        io::ErrorKind::PermissionDenied => Some(EXIT_NOT_EXECUTABLE),
        _ => None,
    }
}

/// Classify a spawn failure: either a completed run with a shell-style exit
/// code, or a hard error.
pub(crate) fn spawn_failure(spec: &ProcessSpec, err: io::Error) -> Result<i32, ProcessError> {
    spawn_exit_code(&err).ok_or_else(|| ProcessError::Spawn {
        program: launch_argv(spec)
            .into_iter()
            .next()
            .unwrap_or_default()
            .into(),
        source: err,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_string_is_passed_verbatim_to_shell() {
        let spec = ProcessSpec::parse("echo $HOME | tr a-z A-Z")
            .expect("spec")
            .with_shell(true)
            .with_shell_path("/bin/bash");
        assert_eq!(
            launch_argv(&spec),
            ["/bin/bash", "-c", "echo $HOME | tr a-z A-Z"]
        );
    }

    #[test]
    fn argv_is_quoted_when_shell_wrapping() {
        let spec = ProcessSpec::new(["printf", "%s", "it's"])
            .expect("spec")
            .with_shell(true);
        let argv = launch_argv(&spec);
        let script = argv.get(2).expect("script present");
        let round_trip = shlex::split(script).expect("script re-tokenises");
        assert_eq!(round_trip, ["printf", "%s", "it's"]);
    }

    #[test]
    fn setsid_is_prepended_before_shell() {
        let spec = ProcessSpec::new(["sleep", "1"])
            .expect("spec")
            .with_new_session(true)
            .with_shell(true);
        let argv = launch_argv(&spec);
        assert_eq!(argv.first().map(String::as_str), Some("/usr/bin/setsid"));
        assert_eq!(argv.get(1).map(String::as_str), Some("/bin/sh"));
    }

    #[test]
    fn plain_argv_is_untouched() {
        let spec = ProcessSpec::new(["ls", "-l", "a b"]).expect("spec");
        assert_eq!(launch_argv(&spec), ["ls", "-l", "a b"]);
    }

    #[test]
    fn missing_and_unexecutable_programs_map_to_shell_codes() {
        let missing = io::Error::from(io::ErrorKind::NotFound);
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        let other = io::Error::other("boom");
        assert_eq!(spawn_exit_code(&missing), Some(EXIT_NOT_FOUND));
        assert_eq!(spawn_exit_code(&denied), Some(EXIT_NOT_EXECUTABLE));
        assert_eq!(spawn_exit_code(&other), None);
    }
}
