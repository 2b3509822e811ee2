//! Errors raised by the curl-backed HTTP transport.

use std::{io, path::PathBuf};

use miette::Diagnostic;
use semver::Version;
use thiserror::Error;

use super::{ResponseBody, StatusLine};
use crate::process::ProcessError;

/// Failures surfaced by [`CurlClient`](super::CurlClient).
#[derive(Debug, Error, Diagnostic)]
pub enum HttpError {
    /// The request URL could not be parsed.
    #[error("invalid URL {url}: {source}")]
    #[diagnostic(code(qel::http::invalid_url))]
    InvalidUrl {
        /// URL as supplied.
        url: String,
        /// Parser error.
        #[source]
        source: url::ParseError,
    },

    /// curl could not be launched or supervised.
    #[error(transparent)]
    #[diagnostic(transparent)]
    Process(#[from] ProcessError),

    /// curl exited unsuccessfully before a response could be read.
    #[error("curl failed: {message}")]
    #[diagnostic(code(qel::http::transport))]
    Transport {
        /// Tail of curl's diagnostics starting at `curl:`.
        message: String,
        /// curl's exit code (negative for a terminating signal).
        exit_code: Option<i32>,
        /// curl gave up because a timeout elapsed.
        timed_out: bool,
        /// The request was cancelled through a [`CancelHandle`](super::CancelHandle).
        cancelled: bool,
    },

    /// The header sideband had no usable status line.
    #[error("malformed response: {message}")]
    #[diagnostic(code(qel::http::protocol))]
    Protocol {
        /// What was wrong with the header block.
        message: String,
    },

    /// The server answered with a non-2xx status and the caller asked for
    /// that to be an error.
    #[error("HTTP {status}")]
    #[diagnostic(code(qel::http::status))]
    Status {
        /// Parsed status line.
        status: StatusLine,
        /// Response body, when one was captured.
        body: Option<ResponseBody>,
    },

    /// A conditional output file could not be written.
    #[error("failed to write response body to {}: {source}", .path.display())]
    #[diagnostic(code(qel::http::output))]
    Output {
        /// Destination path.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// `curl --version` printed nothing recognisable.
    #[error("could not determine curl version from: {output}")]
    #[diagnostic(code(qel::http::version_unknown))]
    UnknownVersion {
        /// First line of the probe output.
        output: String,
    },

    /// The installed curl is older than the oldest supported release.
    #[error("curl {found} is older than the minimum supported {minimum}")]
    #[diagnostic(
        code(qel::http::version_unsupported),
        help("install curl {minimum} or newer, or point QEL_CURL at one")
    )]
    UnsupportedVersion {
        /// Version reported by curl.
        found: Version,
        /// Oldest supported version.
        minimum: Version,
    },

    /// A parallel request worker panicked.
    #[error("request worker panicked")]
    #[diagnostic(code(qel::http::worker_panicked))]
    WorkerPanicked,
}

impl HttpError {
    /// Status line carried by an HTTP status failure.
    #[must_use]
    pub const fn status(&self) -> Option<&StatusLine> {
        match self {
            Self::Status { status, .. } => Some(status),
            _ => None,
        }
    }
}
