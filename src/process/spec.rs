//! Immutable description of a child process launch.

use std::{fs::File, path::PathBuf, sync::Arc, time::Duration};

use indexmap::IndexMap;

use super::ProcessError;
use crate::signals::Signal;

/// Shell used when [`ProcessSpec::with_shell`] is enabled.
pub const DEFAULT_SHELL: &str = "/bin/sh";
/// Launcher prepended when a new session is requested.
pub const DEFAULT_SETSID: &str = "/usr/bin/setsid";
/// Bytes read from an output pipe per read call.
pub const DEFAULT_BUFFER_SIZE: usize = 8192;

/// Where the child's standard input comes from.
#[derive(Debug, Clone, Default)]
pub enum StdinSource {
    /// Share the parent's stdin.
    #[default]
    Inherit,
    /// Connect stdin to `/dev/null`.
    Null,
    /// Read from an already open file.
    File(Arc<File>),
    /// Write this text to a pipe in one shot, then close it.
    Text(String),
}

/// Where the child's standard output goes.
#[derive(Debug, Clone, Default)]
pub enum StdoutSink {
    /// Pump through a pipe to the stdout callback or the capture buffer.
    #[default]
    Stream,
    /// Write into a scratch file that is slurped once the child exits.
    Capture,
    /// Write into a caller-supplied file, rewound for the caller afterwards.
    File(Arc<File>),
}

/// What happens to the child's standard error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StderrPolicy {
    /// Pump through a pipe to the stderr callback or the capture buffer.
    #[default]
    Intercept,
    /// Send stderr wherever stdout goes.
    RedirectToStdout,
    /// Share the parent's stderr.
    Inherit,
}

/// Whether the child environment extends or replaces the parent's.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum EnvMode {
    /// Start from the parent environment and overlay the configured variables.
    #[default]
    Inherit,
    /// Start from an empty environment.
    Replace,
}

/// Environment assembled for a single child.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Environment {
    /// Variables to set, in insertion order.
    pub vars: IndexMap<String, String>,
    /// Merge semantics.
    pub mode: EnvMode,
}

/// Everything needed to launch a child, frozen once a run starts.
///
/// # Examples
/// ```
/// use qel::process::{ProcessSpec, StderrPolicy};
///
/// let spec = ProcessSpec::parse("printf 'a b'")?
///     .with_shell(true)
///     .with_stderr(StderrPolicy::RedirectToStdout);
/// assert_eq!(spec.argv(), ["printf", "a b"]);
/// assert_eq!(spec.command_line(), Some("printf 'a b'"));
/// # Ok::<(), qel::process::ProcessError>(())
/// ```
#[derive(Debug, Clone)]
pub struct ProcessSpec {
    argv: Vec<String>,
    command_line: Option<String>,
    cwd: Option<PathBuf>,
    uid: Option<u32>,
    gid: Option<u32>,
    env: Environment,
    shell: bool,
    shell_path: PathBuf,
    new_session: bool,
    setsid_path: PathBuf,
    timeout: Option<Duration>,
    timeout_signal: Signal,
    stdin: StdinSource,
    stdout: StdoutSink,
    stderr: StderrPolicy,
    line_buffered: bool,
    trim: bool,
    skip_blank_lines: bool,
    buffer_size: usize,
    properties: IndexMap<String, String>,
}

impl ProcessSpec {
    /// Launch `argv[0]` with the remaining arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::EmptyCommand`] when `argv` is empty or its
    /// program is an empty string.
    pub fn new<I, S>(argv: I) -> Result<Self, ProcessError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let argv: Vec<String> = argv.into_iter().map(Into::into).collect();
        if argv.first().is_none_or(String::is_empty) {
            return Err(ProcessError::EmptyCommand);
        }
        Ok(Self {
            argv,
            command_line: None,
            cwd: None,
            uid: None,
            gid: None,
            env: Environment::default(),
            shell: false,
            shell_path: PathBuf::from(DEFAULT_SHELL),
            new_session: false,
            setsid_path: PathBuf::from(DEFAULT_SETSID),
            timeout: None,
            timeout_signal: Signal::SIGTERM,
            stdin: StdinSource::default(),
            stdout: StdoutSink::default(),
            stderr: StderrPolicy::default(),
            line_buffered: false,
            trim: false,
            skip_blank_lines: false,
            buffer_size: DEFAULT_BUFFER_SIZE,
            properties: IndexMap::new(),
        })
    }

    /// Tokenise a command string, honouring single and double quotes.
    ///
    /// When shell wrapping is enabled the original string, not the tokens, is
    /// handed to `sh -c`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::UnbalancedQuotes`] for an unterminated quote and
    /// [`ProcessError::EmptyCommand`] when nothing remains after tokenising.
    pub fn parse(command: &str) -> Result<Self, ProcessError> {
        let argv = shlex::split(command).ok_or_else(|| ProcessError::UnbalancedQuotes {
            command: command.to_owned(),
        })?;
        let mut spec = Self::new(argv)?;
        spec.command_line = Some(command.to_owned());
        Ok(spec)
    }

    /// Run in `dir`.
    #[must_use]
    pub fn with_cwd(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    /// Run as `uid`.
    #[must_use]
    pub const fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Run with primary group `gid`.
    #[must_use]
    pub const fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Set one environment variable for the child.
    #[must_use]
    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.vars.insert(key.into(), value.into());
        self
    }

    /// Choose whether the child sees the parent environment.
    #[must_use]
    pub const fn with_env_mode(mut self, mode: EnvMode) -> Self {
        self.env.mode = mode;
        self
    }

    /// Wrap the command in `shell -c`.
    #[must_use]
    pub const fn with_shell(mut self, enabled: bool) -> Self {
        self.shell = enabled;
        self
    }

    /// Shell used for wrapping.
    #[must_use]
    pub fn with_shell_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.shell_path = path.into();
        self
    }

    /// Start the child in a new session through the `setsid` launcher.
    #[must_use]
    pub const fn with_new_session(mut self, enabled: bool) -> Self {
        self.new_session = enabled;
        self
    }

    /// Launcher used for new sessions.
    #[must_use]
    pub fn with_setsid_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.setsid_path = path.into();
        self
    }

    /// Deliver the timeout signal once `timeout` elapses.
    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Signal delivered on timeout. Defaults to `SIGTERM`.
    #[must_use]
    pub const fn with_timeout_signal(mut self, signal: Signal) -> Self {
        self.timeout_signal = signal;
        self
    }

    /// Configure standard input.
    #[must_use]
    pub fn with_stdin(mut self, source: StdinSource) -> Self {
        self.stdin = source;
        self
    }

    /// Feed `text` to the child's standard input.
    #[must_use]
    pub fn with_input(self, text: impl Into<String>) -> Self {
        self.with_stdin(StdinSource::Text(text.into()))
    }

    /// Configure standard output.
    #[must_use]
    pub fn with_stdout(mut self, sink: StdoutSink) -> Self {
        self.stdout = sink;
        self
    }

    /// Configure standard error.
    #[must_use]
    pub const fn with_stderr(mut self, policy: StderrPolicy) -> Self {
        self.stderr = policy;
        self
    }

    /// Deliver one event per complete line instead of one per read.
    #[must_use]
    pub const fn with_line_buffered(mut self, enabled: bool) -> Self {
        self.line_buffered = enabled;
        self
    }

    /// Trim captured output once the child exits.
    #[must_use]
    pub const fn with_trim(mut self, enabled: bool) -> Self {
        self.trim = enabled;
        self
    }

    /// Drop blank lines from line events and captured output.
    #[must_use]
    pub const fn with_skip_blank_lines(mut self, enabled: bool) -> Self {
        self.skip_blank_lines = enabled;
        self
    }

    /// Read at most `bytes` per pipe read. Zero is treated as one.
    #[must_use]
    pub fn with_buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes.max(1);
        self
    }

    /// Attach an opaque property for the caller's own bookkeeping.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Tokenised argument vector.
    #[must_use]
    pub fn argv(&self) -> &[String] {
        &self.argv
    }

    /// Original command string when built with [`ProcessSpec::parse`].
    #[must_use]
    pub fn command_line(&self) -> Option<&str> {
        self.command_line.as_deref()
    }

    /// Working directory, if any.
    #[must_use]
    pub fn cwd(&self) -> Option<&std::path::Path> {
        self.cwd.as_deref()
    }

    /// User id to switch to.
    #[must_use]
    pub const fn uid(&self) -> Option<u32> {
        self.uid
    }

    /// Group id to switch to.
    #[must_use]
    pub const fn gid(&self) -> Option<u32> {
        self.gid
    }

    /// Child environment.
    #[must_use]
    pub const fn env(&self) -> &Environment {
        &self.env
    }

    /// Whether the command is wrapped in a shell.
    #[must_use]
    pub const fn shell(&self) -> bool {
        self.shell
    }

    /// Shell used for wrapping.
    #[must_use]
    pub fn shell_path(&self) -> &std::path::Path {
        &self.shell_path
    }

    /// Whether the child starts a new session.
    #[must_use]
    pub const fn new_session(&self) -> bool {
        self.new_session
    }

    /// Launcher used for new sessions.
    #[must_use]
    pub fn setsid_path(&self) -> &std::path::Path {
        &self.setsid_path
    }

    /// Configured timeout.
    #[must_use]
    pub const fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Signal delivered on timeout.
    #[must_use]
    pub const fn timeout_signal(&self) -> Signal {
        self.timeout_signal
    }

    /// Standard input source.
    #[must_use]
    pub const fn stdin(&self) -> &StdinSource {
        &self.stdin
    }

    /// Standard output sink.
    #[must_use]
    pub const fn stdout(&self) -> &StdoutSink {
        &self.stdout
    }

    /// Standard error policy.
    #[must_use]
    pub const fn stderr(&self) -> StderrPolicy {
        self.stderr
    }

    /// Whether output is delivered per line.
    #[must_use]
    pub const fn line_buffered(&self) -> bool {
        self.line_buffered
    }

    /// Whether captured output is trimmed.
    #[must_use]
    pub const fn trim(&self) -> bool {
        self.trim
    }

    /// Whether blank lines are dropped.
    #[must_use]
    pub const fn skip_blank_lines(&self) -> bool {
        self.skip_blank_lines
    }

    /// Pipe read size in bytes.
    #[must_use]
    pub const fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Caller-defined properties.
    #[must_use]
    pub const fn properties(&self) -> &IndexMap<String, String> {
        &self.properties
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("echo hello", &["echo", "hello"])]
    #[case(r#"printf "%s\n" 'a b'"#, &["printf", "%s\\n", "a b"])]
    #[case("  ls   -l  ", &["ls", "-l"])]
    fn parses_quoted_command_strings(#[case] input: &str, #[case] expected: &[&str]) {
        let spec = ProcessSpec::parse(input).expect("command parses");
        assert_eq!(spec.argv(), expected);
        assert_eq!(spec.command_line(), Some(input));
    }

    #[rstest]
    #[case("echo 'open")]
    #[case("echo \"open")]
    fn rejects_unbalanced_quotes(#[case] input: &str) {
        let err = ProcessSpec::parse(input).expect_err("unbalanced quotes fail");
        assert!(matches!(err, ProcessError::UnbalancedQuotes { .. }));
    }

    #[rstest]
    #[case("")]
    #[case("   ")]
    #[case("''")]
    fn rejects_empty_commands(#[case] input: &str) {
        let err = ProcessSpec::parse(input).expect_err("empty command fails");
        assert!(matches!(err, ProcessError::EmptyCommand));
    }

    #[test]
    fn defaults_match_documented_configuration() {
        let spec = ProcessSpec::new(["true"]).expect("spec");
        assert_eq!(spec.shell_path(), std::path::Path::new(DEFAULT_SHELL));
        assert_eq!(spec.setsid_path(), std::path::Path::new(DEFAULT_SETSID));
        assert_eq!(spec.buffer_size(), DEFAULT_BUFFER_SIZE);
        assert_eq!(spec.timeout_signal(), Signal::SIGTERM);
        assert_eq!(spec.stderr(), StderrPolicy::Intercept);
        assert!(matches!(spec.stdout(), StdoutSink::Stream));
        assert_eq!(spec.env().mode, EnvMode::Inherit);
        assert!(spec.timeout().is_none());
    }

    #[test]
    fn builders_record_properties_in_order() {
        let spec = ProcessSpec::new(["true"])
            .expect("spec")
            .with_property("b", "2")
            .with_property("a", "1")
            .with_buffer_size(0);
        let keys: Vec<_> = spec.properties().keys().map(String::as_str).collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(spec.buffer_size(), 1);
    }
}
