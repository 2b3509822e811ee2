//! Command line interface definition using clap.
//!
//! This module defines the [`Cli`] structure and its subcommands, plus the
//! conversions from parsed arguments into process and request descriptions.

use std::{path::PathBuf, time::Duration};

use clap::{Args, Parser, Subcommand};

use crate::{
    http::{HttpRequest, Method, OutputSink},
    process::{ProcessError, ProcessSpec, StderrPolicy},
    signals::Signal,
};

mod parsing;

use parsing::{parse_header, parse_json, parse_seconds, parse_signal};

/// Supervise subprocesses and make HTTP requests through curl.
#[derive(Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose diagnostic logging.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Available top-level commands.
#[derive(Debug, Subcommand, Clone)]
pub enum Commands {
    /// Run a command under supervision, streaming its output.
    Exec(ExecArgs),
    /// Perform an HTTP request through curl and print the body.
    Http(HttpArgs),
    /// List known signals, or describe one.
    Signals {
        /// Signal name (`TERM`, `SIGTERM`) or number.
        #[arg(value_name = "NAME|NUMBER")]
        signal: Option<String>,
    },
}

/// Arguments accepted by the `exec` command.
#[derive(Debug, Args, Clone, PartialEq, Eq)]
pub struct ExecArgs {
    /// Run the command line through a shell.
    #[arg(long)]
    pub shell: bool,

    /// Shell used with `--shell`.
    #[arg(long, value_name = "PATH", requires = "shell")]
    pub shell_path: Option<PathBuf>,

    /// Signal the command after this many seconds.
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub timeout: Option<Duration>,

    /// Signal sent when the timeout elapses.
    #[arg(long, value_name = "SIGNAL", value_parser = parse_signal, default_value = "TERM")]
    pub timeout_signal: Signal,

    /// Deliver output one line at a time.
    #[arg(long)]
    pub line_buffered: bool,

    /// Trim captured output (with `--sync`).
    #[arg(long)]
    pub trim: bool,

    /// Drop blank lines.
    #[arg(long)]
    pub skip_blank: bool,

    /// Send stderr wherever stdout goes.
    #[arg(long)]
    pub merge_stderr: bool,

    /// Run the command in this directory.
    #[arg(long, value_name = "DIR")]
    pub cwd: Option<PathBuf>,

    /// Text written to the command's stdin.
    #[arg(long, value_name = "TEXT")]
    pub input: Option<String>,

    /// Wait for completion and print captured output instead of streaming.
    #[arg(long)]
    pub sync: bool,

    /// Command and arguments.
    #[arg(last = true, required = true, value_name = "CMD")]
    pub command: Vec<String>,
}

impl ExecArgs {
    /// Build the launch description for these arguments.
    ///
    /// With `--shell` the words are joined into a single command line for
    /// `sh -c`.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::EmptyCommand`] or
    /// [`ProcessError::UnbalancedQuotes`] for unusable commands.
    pub fn to_spec(&self) -> Result<ProcessSpec, ProcessError> {
        let mut spec = if self.shell {
            ProcessSpec::parse(&self.command.join(" "))?.with_shell(true)
        } else {
            ProcessSpec::new(self.command.iter().cloned())?
        };
        if let Some(path) = &self.shell_path {
            spec = spec.with_shell_path(path);
        }
        if let Some(timeout) = self.timeout {
            spec = spec.with_timeout(timeout);
        }
        if let Some(dir) = &self.cwd {
            spec = spec.with_cwd(dir);
        }
        if let Some(input) = &self.input {
            spec = spec.with_input(input.clone());
        }
        if self.merge_stderr {
            spec = spec.with_stderr(StderrPolicy::RedirectToStdout);
        }
        Ok(spec
            .with_timeout_signal(self.timeout_signal)
            .with_line_buffered(self.line_buffered)
            .with_trim(self.trim)
            .with_skip_blank_lines(self.skip_blank))
    }
}

/// Arguments accepted by the `http` command.
#[derive(Debug, Args, Clone, PartialEq)]
pub struct HttpArgs {
    /// Request URL.
    #[arg(value_name = "URL")]
    pub url: String,

    /// Request method; unknown methods fall back to GET.
    #[arg(short = 'X', long = "request", value_name = "METHOD", default_value = "GET")]
    pub method: String,

    /// Request header, repeatable.
    #[arg(short = 'H', long = "header", value_name = "NAME: VALUE", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,

    /// Form data sent as the body.
    #[arg(long, value_name = "DATA", conflicts_with = "json")]
    pub data: Option<String>,

    /// JSON document sent as the body.
    #[arg(long, value_name = "JSON", value_parser = parse_json)]
    pub json: Option<serde_json::Value>,

    /// Write the body to this file instead of stdout.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Exit with an error on a non-2xx status.
    #[arg(long)]
    pub fail: bool,

    /// Give up after this many seconds.
    #[arg(long, value_name = "SECONDS", value_parser = parse_seconds)]
    pub max_time: Option<Duration>,

    /// Do not follow redirects.
    #[arg(long)]
    pub no_follow: bool,

    /// Print the status line and headers before the body.
    #[arg(short, long)]
    pub include: bool,
}

impl HttpArgs {
    /// Build the request for these arguments.
    #[must_use]
    pub fn to_request(&self) -> HttpRequest {
        let mut request = HttpRequest::new(self.url.clone())
            .with_method(Method::from_str_lossy(&self.method))
            .with_follow_redirects(!self.no_follow)
            .with_fail_on_http_error(self.fail);
        for (name, value) in &self.headers {
            request = request.with_header(name.clone(), value.clone());
        }
        if let Some(data) = &self.data {
            request = request.with_data(data.clone());
        }
        if let Some(json) = &self.json {
            request = request.with_json(json.clone());
        }
        if let Some(path) = &self.output {
            request = request.with_output(OutputSink::File(path.clone()));
        }
        if let Some(timeout) = self.max_time {
            request = request.with_max_time(timeout);
        }
        request
    }
}
