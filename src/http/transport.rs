//! Running curl under the supervisor and turning its output into a response.

use std::{
    fs::File,
    io,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    thread,
    time::Instant,
};

use camino::Utf8PathBuf;
use tracing::debug;

use super::{
    HttpError, HttpRequest, HttpResponse, OutputSink, ResponseBody, curl_args, ensure_supported,
    parse_curl_version, parse_header_block, parse_set_cookies, resolve_curl_program,
};
use crate::{
    kill::KillOptions,
    process::{ProcessSpec, ProcessState, StdinSource, StdoutSink, Supervisor, run_sync},
    signals::Signal,
};

/// curl's exit code for an elapsed `--max-time` or `--connect-timeout`.
pub const CURL_TIMEOUT_EXIT: i32 = 28;

/// Options for [`CurlClient::fetch`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FetchOptions {
    /// Return the response even when curl failed, the header block was
    /// unusable or the status was an error.
    pub ignore_error: bool,
}

#[derive(Debug)]
struct CancelState {
    signal: Signal,
    cancelled: bool,
    supervisor: Option<Supervisor>,
}

/// Cancels an in-flight request by signalling its curl process.
///
/// Clones share state, so one clone can be handed to another thread while
/// the original is passed to [`CurlClient::execute_with_cancel`].
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<Mutex<CancelState>>,
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new(Signal::SIGTERM)
    }
}

impl CancelHandle {
    /// Handle that cancels with `signal`.
    #[must_use]
    pub fn new(signal: Signal) -> Self {
        Self {
            state: Arc::new(Mutex::new(CancelState {
                signal,
                cancelled: false,
                supervisor: None,
            })),
        }
    }

    fn lock(&self) -> MutexGuard<'_, CancelState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Request cancellation. Returns whether a running curl was signalled.
    ///
    /// Cancelling before the request starts makes it finish immediately as
    /// cancelled.
    ///
    /// # Errors
    ///
    /// Propagates signal delivery failures.
    pub fn cancel(&self) -> Result<bool, HttpError> {
        let mut state = self.lock();
        state.cancelled = true;
        let signal = state.signal;
        match &state.supervisor {
            Some(supervisor) => Ok(supervisor.kill(KillOptions::new(signal))?),
            None => Ok(false),
        }
    }

    /// Whether [`CancelHandle::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.lock().cancelled
    }

    /// Signal used for cancellation.
    #[must_use]
    pub fn signal(&self) -> Signal {
        self.lock().signal
    }
}

/// Where the body ends up for one invocation.
enum BodyRoute {
    Memory,
    Elsewhere,
    Conditional(Arc<File>),
}

/// HTTP client driving an external curl binary.
///
/// # Examples
/// ```no_run
/// use qel::http::{CurlClient, HttpRequest};
///
/// let client = CurlClient::from_env();
/// let response = client.execute(&HttpRequest::new("https://example.test/"))?;
/// println!("{:?}", response.status);
/// # Ok::<(), qel::http::HttpError>(())
/// ```
#[derive(Debug, Clone)]
pub struct CurlClient {
    program: Utf8PathBuf,
}

impl Default for CurlClient {
    fn default() -> Self {
        Self::from_env()
    }
}

impl CurlClient {
    /// Client running `program`.
    #[must_use]
    pub fn new(program: impl Into<Utf8PathBuf>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Client running `QEL_CURL`, or `curl` from `PATH`.
    #[must_use]
    pub fn from_env() -> Self {
        Self::new(resolve_curl_program())
    }

    /// The curl executable.
    #[must_use]
    pub fn program(&self) -> &camino::Utf8Path {
        &self.program
    }

    /// Perform `request`.
    ///
    /// curl-level failures are reported on the response (`curl_failed`,
    /// `timed_out`), not as errors.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::InvalidUrl`] before running anything,
    /// [`HttpError::Process`] when curl cannot be supervised,
    /// [`HttpError::Protocol`] for an unusable header block,
    /// [`HttpError::Output`] when a conditional output file cannot be written
    /// and [`HttpError::Status`] for a non-2xx status when the request asks
    /// for that.
    pub fn execute(&self, request: &HttpRequest) -> Result<HttpResponse, HttpError> {
        let response = self.perform(request, None, false)?;
        escalate_status(request, response)
    }

    /// [`CurlClient::execute`] that can be interrupted through `cancel`.
    ///
    /// # Errors
    ///
    /// As for [`CurlClient::execute`].
    pub fn execute_with_cancel(
        &self,
        request: &HttpRequest,
        cancel: &CancelHandle,
    ) -> Result<HttpResponse, HttpError> {
        let response = self.perform(request, Some(cancel), false)?;
        escalate_status(request, response)
    }

    /// Perform `request`, turning curl failures into errors unless
    /// `options.ignore_error` is set.
    ///
    /// # Errors
    ///
    /// As for [`CurlClient::execute`], plus [`HttpError::Transport`] when
    /// curl fails. With `ignore_error` only URL, process and output errors
    /// remain.
    pub fn fetch(
        &self,
        request: &HttpRequest,
        options: FetchOptions,
    ) -> Result<HttpResponse, HttpError> {
        let response = self.perform(request, None, options.ignore_error)?;
        if options.ignore_error {
            return Ok(response);
        }
        if response.curl_failed {
            return Err(HttpError::Transport {
                message: response.curl_error.clone().unwrap_or_default(),
                exit_code: response.exit_code,
                timed_out: response.timed_out,
                cancelled: response.was_cancelled,
            });
        }
        escalate_status(request, response)
    }

    /// Fetch every request in parallel, returning results in input order.
    #[must_use]
    pub fn fetch_all(&self, requests: &[HttpRequest]) -> Vec<Result<HttpResponse, HttpError>> {
        thread::scope(|scope| {
            let handles: Vec<_> = requests
                .iter()
                .map(|request| scope.spawn(move || self.fetch(request, FetchOptions::default())))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(HttpError::WorkerPanicked))
                })
                .collect()
        })
    }

    /// Run `curl --version` and check it is new enough.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::UnknownVersion`] when curl fails or prints
    /// something unrecognisable and [`HttpError::UnsupportedVersion`] when it
    /// predates [`MIN_CURL_VERSION`](super::MIN_CURL_VERSION).
    pub fn probe_version(&self) -> Result<semver::Version, HttpError> {
        let spec = ProcessSpec::new([self.program.as_str(), "--version"])?
            .with_stdin(StdinSource::Null)
            .with_stdout(StdoutSink::Capture);
        let output = run_sync(&spec)?;
        if !output.state.success() {
            return Err(HttpError::UnknownVersion {
                output: output.stderr.trim().to_owned(),
            });
        }
        let version = parse_curl_version(&output.stdout)?;
        debug!(%version, program = %self.program, "probed curl");
        ensure_supported(version)
    }

    fn perform(
        &self,
        request: &HttpRequest,
        cancel: Option<&CancelHandle>,
        lenient: bool,
    ) -> Result<HttpResponse, HttpError> {
        url::Url::parse(request.url()).map_err(|source| HttpError::InvalidUrl {
            url: request.url().to_owned(),
            source,
        })?;

        let mut argv = vec![self.program.to_string()];
        argv.extend(curl_args(request));
        let (sink, route) = match request.output() {
            OutputSink::Memory => (StdoutSink::Stream, BodyRoute::Memory),
            OutputSink::File(_) => (StdoutSink::Stream, BodyRoute::Elsewhere),
            OutputSink::Descriptor(file) => (StdoutSink::File(Arc::clone(file)), BodyRoute::Elsewhere),
            OutputSink::Conditional { .. } => {
                let scratch = Arc::new(
                    tempfile::tempfile()
                        .map_err(crate::process::ProcessError::resource("conditional output file"))?,
                );
                (StdoutSink::File(Arc::clone(&scratch)), BodyRoute::Conditional(scratch))
            }
        };
        let spec = ProcessSpec::new(argv)?
            .with_stdin(StdinSource::Null)
            .with_stdout(sink);

        let started = Instant::now();
        let (supervisor, state) = run_curl(spec, cancel)?;
        let mut response = HttpResponse {
            duration: started.elapsed(),
            exit_code: state.exit_code,
            ..HttpResponse::default()
        };
        let stderr = supervisor.captured_stderr();

        if state.success() {
            match parse_header_block(&stderr, request.lowercase_headers(), request.header_mode()) {
                Ok(head) => {
                    response.cookies = parse_set_cookies(&head.set_cookies);
                    response.status = head.status;
                    response.headers = head.headers;
                    response.content_type = head.content_type;
                }
                Err(err) if lenient => debug!(%err, "ignoring unusable header block"),
                Err(err) => return Err(err),
            }
            if matches!(route, BodyRoute::Memory) {
                response.body = Some(ResponseBody::decode(
                    supervisor.captured_stdout(),
                    response.content_type.as_deref(),
                    request.parse_json(),
                ));
            }
        } else {
            classify_failure(&mut response, &state, &stderr, cancel);
        }

        if let (BodyRoute::Conditional(scratch), OutputSink::Conditional { path, predicate }) =
            (&route, request.output())
        {
            if predicate(&response) {
                copy_scratch(scratch, path)?;
            } else {
                debug!(path = %path.display(), "conditional output rejected");
            }
        }
        Ok(response)
    }
}

fn run_curl(
    spec: ProcessSpec,
    cancel: Option<&CancelHandle>,
) -> Result<(Supervisor, ProcessState), HttpError> {
    let supervisor = Supervisor::new(spec);
    let completion = match cancel {
        Some(handle) => {
            let mut state = handle.lock();
            if state.cancelled {
                let cancelled = ProcessState {
                    exit_code: Some(-(state.signal as i32)),
                    signal: Some(state.signal.as_str().to_owned()),
                    ..ProcessState::default()
                };
                return Ok((supervisor, cancelled));
            }
            let completion = supervisor.run()?;
            state.supervisor = Some(supervisor.clone());
            completion
        }
        None => supervisor.run()?,
    };
    let state = completion.wait();
    if let Some(handle) = cancel {
        handle.lock().supervisor = None;
    }
    Ok((supervisor, state))
}

fn classify_failure(
    response: &mut HttpResponse,
    state: &ProcessState,
    stderr: &str,
    cancel: Option<&CancelHandle>,
) {
    response.curl_failed = true;
    let message = stderr
        .find("curl:")
        .and_then(|at| stderr.get(at..))
        .unwrap_or(stderr)
        .trim();
    if !message.is_empty() {
        response.curl_error = Some(message.to_owned());
    }
    response.timed_out = state.exit_code == Some(CURL_TIMEOUT_EXIT) || state.timed_out;
    if let Some(handle) = cancel {
        let expected = -(handle.signal() as i32);
        response.was_cancelled = handle.is_cancelled() && state.exit_code == Some(expected);
    }
}

fn copy_scratch(scratch: &File, path: &std::path::Path) -> Result<(), HttpError> {
    let output_error = |source: io::Error| HttpError::Output {
        path: path.to_path_buf(),
        source,
    };
    let mut reader = scratch;
    io::Seek::rewind(&mut reader).map_err(output_error)?;
    let mut destination = File::create(path).map_err(output_error)?;
    io::copy(&mut reader, &mut destination).map_err(output_error)?;
    Ok(())
}

fn escalate_status(
    request: &HttpRequest,
    response: HttpResponse,
) -> Result<HttpResponse, HttpError> {
    if !(request.fail_on_http_error() && response.http_failed()) {
        return Ok(response);
    }
    let HttpResponse { status, body, .. } = response;
    match status {
        Some(status) => Err(HttpError::Status { status, body }),
        None => Err(HttpError::Protocol {
            message: "missing status line".to_owned(),
        }),
    }
}
