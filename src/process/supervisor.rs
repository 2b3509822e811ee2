//! Asynchronous child supervisor.
//!
//! [`Supervisor::run`] spawns the child and returns immediately with a
//! [`Completion`]. Work then happens on dedicated threads:
//!
//! - one pump per intercepted output pipe, delivering chunks or lines to the
//!   registered callback (or into the capture buffer when none is registered);
//! - one writer feeding in-memory input to stdin;
//! - one one-shot timer when a timeout is configured;
//! - one finaliser that waits for every pump to reach EOF, reaps the child,
//!   decodes the wait status, fires the exit callback exactly once and
//!   resolves the completion.
//!
//! Per-stream state never leaves its pump thread. Shared state (phase, pid,
//! capture buffers) sits behind a single mutex, which is also held while
//! signalling the child so a signal can never reach a reaped pid.

use std::{
    fmt,
    fs::File,
    io::{self, PipeReader, Read},
    panic::{self, AssertUnwindSafe},
    process::{Child, ExitStatus},
    sync::{
        Arc, Condvar, Mutex, MutexGuard, PoisonError,
        mpsc::{self, RecvTimeoutError, Sender},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use tracing::{debug, warn};

use super::{
    LifecycleEvent, OutputStream, ProcessError, ProcessSpec, ProcessState, StderrPolicy,
    StdoutSink, StreamEvent,
    command::{EXIT_NOT_FOUND, build_command, spawn_failure},
    events::monotonic_ms,
    output::{NOT_FOUND_MESSAGE, finish_output, read_back, rewind},
    pipes::{join_stdin_writer, spawn_stdin_writer},
    wiring::{Channel, Transport, Wiring, wire},
};
use crate::{
    framing::{LineBuffer, Utf8Decoder},
    kill::{KillOptions, kill_process, send_signal},
    signals::{Signal, is_catchable, is_termination},
};

type DataHandler = Box<dyn FnMut(&StreamEvent) + Send>;
type ExitHandler = Box<dyn FnMut(&ProcessState) + Send>;
type LifecycleHandler = Box<dyn FnMut(&LifecycleEvent) + Send>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Single replaceable callback.
///
/// The handler is taken out of the slot while it runs so it may replace
/// itself (or any other slot) without deadlocking. A replacement installed
/// during the call wins over the handler being put back.
struct Slot<H>(Mutex<Option<H>>);

impl<H> Slot<H> {
    const fn empty() -> Self {
        Self(Mutex::new(None))
    }

    fn set(&self, handler: H) {
        *lock(&self.0) = Some(handler);
    }

    fn call<R>(&self, invoke: impl FnOnce(&mut H) -> R) -> Option<R> {
        let mut handler = lock(&self.0).take()?;
        let result = invoke(&mut handler);
        let mut slot = lock(&self.0);
        if slot.is_none() {
            *slot = Some(handler);
        }
        Some(result)
    }

    /// Run the handler on a supervisor thread, returning whether one ran.
    ///
    /// A panicking handler is logged and dropped from the slot; the panic
    /// does not unwind into the pump or finaliser.
    fn call_guarded(&self, name: &'static str, invoke: impl FnOnce(&mut H)) -> bool {
        match panic::catch_unwind(AssertUnwindSafe(|| self.call(invoke))) {
            Ok(ran) => ran.is_some(),
            Err(_) => {
                warn!(callback = name, "callback panicked; handler dropped");
                true
            }
        }
    }
}

/// One-shot result shared between the finaliser and waiters.
#[derive(Debug, Default)]
struct Promise {
    state: Mutex<Option<ProcessState>>,
    ready: Condvar,
}

impl Promise {
    fn resolve(&self, state: ProcessState) {
        *lock(&self.state) = Some(state);
        self.ready.notify_all();
    }

    fn wait(&self) -> ProcessState {
        let guard = self
            .ready
            .wait_while(lock(&self.state), |state| state.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone().unwrap_or_default()
    }

    fn wait_timeout(&self, timeout: Duration) -> Option<ProcessState> {
        let (guard, _) = self
            .ready
            .wait_timeout_while(lock(&self.state), timeout, |state| state.is_none())
            .unwrap_or_else(PoisonError::into_inner);
        guard.clone()
    }

    fn peek(&self) -> Option<ProcessState> {
        lock(&self.state).clone()
    }
}

/// Handle on a single run, resolved once the child is reaped.
#[derive(Debug, Clone)]
pub struct Completion {
    pid: u32,
    promise: Arc<Promise>,
}

impl Completion {
    /// Pid of the child, `0` when it never started.
    #[must_use]
    pub const fn pid(&self) -> u32 {
        self.pid
    }

    /// Block until the run is finalised.
    #[must_use]
    pub fn wait(&self) -> ProcessState {
        self.promise.wait()
    }

    /// Block for at most `timeout`; `None` if the run is still in flight.
    #[must_use]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<ProcessState> {
        self.promise.wait_timeout(timeout)
    }

    /// Final state without blocking, if already resolved.
    #[must_use]
    pub fn state(&self) -> Option<ProcessState> {
        self.promise.peek()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Running,
    Paused,
    Exiting,
    Finished,
}

#[derive(Debug)]
struct RunState {
    phase: Phase,
    state: ProcessState,
    stdout: String,
    stderr: String,
    promise: Option<Arc<Promise>>,
}

impl RunState {
    const fn new() -> Self {
        Self {
            phase: Phase::Idle,
            state: ProcessState::started(0),
            stdout: String::new(),
            stderr: String::new(),
            promise: None,
        }
    }

    fn reset(&mut self) {
        *self = Self::new();
    }

    fn buffer(&mut self, stream: OutputStream) -> &mut String {
        match stream {
            OutputStream::Stdout => &mut self.stdout,
            OutputStream::Stderr => &mut self.stderr,
        }
    }

    const fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Running | Phase::Paused)
    }
}

struct Inner {
    spec: Arc<ProcessSpec>,
    on_stdout: Slot<DataHandler>,
    on_stderr: Slot<DataHandler>,
    on_exit: Slot<ExitHandler>,
    on_pause: Slot<LifecycleHandler>,
    on_resume: Slot<LifecycleHandler>,
    run: Mutex<RunState>,
}

impl Inner {
    fn lock_run(&self) -> MutexGuard<'_, RunState> {
        lock(&self.run)
    }

    const fn data_slot(&self, stream: OutputStream) -> &Slot<DataHandler> {
        match stream {
            OutputStream::Stdout => &self.on_stdout,
            OutputStream::Stderr => &self.on_stderr,
        }
    }

    /// Deliver `event` to its callback, or append it to the capture buffer.
    fn emit(&self, event: &StreamEvent, line: bool) {
        if self
            .data_slot(event.stream)
            .call_guarded(event.stream.as_str(), |handler| handler(event))
        {
            return;
        }
        let mut run = self.lock_run();
        let buffer = run.buffer(event.stream);
        buffer.push_str(&event.data);
        if line {
            buffer.push('\n');
        }
    }

    fn fire_timeout(&self) {
        let mut run = self.lock_run();
        if !run.is_active() {
            return;
        }
        run.state.timed_out = true;
        let pid = run.state.pid;
        let signal = self.spec.timeout_signal();
        debug!(pid, %signal, "timeout elapsed");
        let paused = run.phase == Phase::Paused;
        if let Err(err) = kill_process(pid, KillOptions::new(signal), paused) {
            warn!(pid, %err, "failed to deliver timeout signal");
        } else if paused && is_termination(signal) && is_catchable(signal) {
            run.phase = Phase::Running;
        }
    }
}

/// Launches a child and supervises it until it is reaped.
///
/// The handle is cheap to clone; clones share the same child, callbacks and
/// capture buffers.
///
/// # Examples
/// ```no_run
/// use qel::process::{ProcessSpec, Supervisor};
///
/// let supervisor = Supervisor::new(ProcessSpec::parse("printf 'a\\nb\\n'")?.with_line_buffered(true));
/// supervisor.on_stdout(|event| println!("{}: {}", event.timestamp, event.data));
/// let state = supervisor.run()?.wait();
/// assert_eq!(state.exit_code, Some(0));
/// # Ok::<(), qel::process::ProcessError>(())
/// ```
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

impl fmt::Debug for Supervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let run = self.inner.lock_run();
        f.debug_struct("Supervisor")
            .field("argv", &self.inner.spec.argv())
            .field("phase", &run.phase)
            .field("state", &run.state)
            .finish_non_exhaustive()
    }
}

impl Supervisor {
    /// Supervise children launched from `spec`.
    #[must_use]
    pub fn new(spec: ProcessSpec) -> Self {
        Self {
            inner: Arc::new(Inner {
                spec: Arc::new(spec),
                on_stdout: Slot::empty(),
                on_stderr: Slot::empty(),
                on_exit: Slot::empty(),
                on_pause: Slot::empty(),
                on_resume: Slot::empty(),
                run: Mutex::new(RunState::new()),
            }),
        }
    }

    /// Launch description.
    #[must_use]
    pub fn spec(&self) -> &ProcessSpec {
        &self.inner.spec
    }

    /// Replace the stdout callback.
    pub fn on_stdout<F>(&self, handler: F)
    where
        F: FnMut(&StreamEvent) + Send + 'static,
    {
        self.inner.on_stdout.set(Box::new(handler));
    }

    /// Replace the stderr callback.
    pub fn on_stderr<F>(&self, handler: F)
    where
        F: FnMut(&StreamEvent) + Send + 'static,
    {
        self.inner.on_stderr.set(Box::new(handler));
    }

    /// Replace the exit callback, invoked once per run after the last data
    /// event.
    pub fn on_exit<F>(&self, handler: F)
    where
        F: FnMut(&ProcessState) + Send + 'static,
    {
        self.inner.on_exit.set(Box::new(handler));
    }

    /// Replace the pause callback.
    pub fn on_pause<F>(&self, handler: F)
    where
        F: FnMut(&LifecycleEvent) + Send + 'static,
    {
        self.inner.on_pause.set(Box::new(handler));
    }

    /// Replace the resume callback.
    pub fn on_resume<F>(&self, handler: F)
    where
        F: FnMut(&LifecycleEvent) + Send + 'static,
    {
        self.inner.on_resume.set(Box::new(handler));
    }

    /// Spawn the child and start supervising it.
    ///
    /// Re-running a finished supervisor clears the previous state and
    /// capture buffers first. A program that cannot be found (or executed)
    /// completes with exit code 127 (or 126) rather than failing here.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError::AlreadyRunning`] while a previous run is in
    /// flight, [`ProcessError::Resource`] when pipes or scratch files cannot
    /// be created and [`ProcessError::Spawn`] for other spawn failures.
    pub fn run(&self) -> Result<Completion, ProcessError> {
        let spec = Arc::clone(&self.inner.spec);
        let mut run = self.inner.lock_run();
        if matches!(run.phase, Phase::Running | Phase::Paused | Phase::Exiting) {
            return Err(ProcessError::AlreadyRunning { pid: run.state.pid });
        }
        run.reset();

        let mut command = build_command(&spec);
        let wiring = wire(&spec, &mut command, Transport::Pipes)?;
        let spawned = command.spawn();
        drop(command);

        let promise = Arc::new(Promise::default());
        let launch = match spawned {
            Ok(mut child) => {
                let pid = child.id();
                debug!(pid, "spawned child");
                run.state = ProcessState::started(pid);
                run.phase = Phase::Running;
                Launch::Spawned(self.start_workers(&mut child, wiring, pid), child)
            }
            Err(err) => {
                let code = spawn_failure(&spec, err)?;
                debug!(code, "program could not be started");
                run.phase = Phase::Exiting;
                Launch::Failed(code)
            }
        };
        run.promise = Some(Arc::clone(&promise));
        let pid = run.state.pid;
        drop(run);

        let inner = Arc::clone(&self.inner);
        let finaliser_promise = Arc::clone(&promise);
        thread::spawn(move || finalise(&inner, launch, &finaliser_promise));
        Ok(Completion { pid, promise })
    }

    fn start_workers(&self, child: &mut Child, wiring: Wiring, pid: u32) -> Workers {
        let stdin_writer = match (child.stdin.take(), wiring.input) {
            (Some(stdin), Some(text)) => Some(spawn_stdin_writer(stdin, text)),
            _ => None,
        };
        let (stdout_pump, stdout_scratch) =
            self.start_channel(wiring.stdout, OutputStream::Stdout, pid);
        let (stderr_pump, _) = self.start_channel(wiring.stderr, OutputStream::Stderr, pid);
        let timer = self
            .inner
            .spec
            .timeout()
            .map(|timeout| Timer::start(Arc::clone(&self.inner), timeout));
        Workers {
            stdout_pump,
            stderr_pump,
            stdin_writer,
            timer,
            stdout_scratch,
        }
    }

    fn start_channel(
        &self,
        channel: Channel,
        stream: OutputStream,
        pid: u32,
    ) -> (Option<JoinHandle<bool>>, Option<File>) {
        match channel {
            Channel::Pipe(reader) => {
                let inner = Arc::clone(&self.inner);
                let handle = thread::spawn(move || pump(&inner, stream, reader, pid));
                (Some(handle), None)
            }
            Channel::Scratch(file) => (None, Some(file)),
            Channel::Detached => (None, None),
        }
    }

    /// Block until the current run finishes; `None` if `run` was never called.
    #[must_use]
    pub fn wait(&self) -> Option<ProcessState> {
        let promise = self.inner.lock_run().promise.clone()?;
        Some(promise.wait())
    }

    /// Snapshot of the current state.
    #[must_use]
    pub fn state(&self) -> ProcessState {
        self.inner.lock_run().state.clone()
    }

    /// Whether a child is running or paused.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lock_run().is_active()
    }

    /// Whether the child is currently stopped by [`Supervisor::pause`].
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.lock_run().phase == Phase::Paused
    }

    /// Stdout collected while no stdout callback was registered, or the
    /// capture-file contents once the run has finished.
    #[must_use]
    pub fn captured_stdout(&self) -> String {
        self.inner.lock_run().stdout.clone()
    }

    /// Stderr collected while no stderr callback was registered.
    #[must_use]
    pub fn captured_stderr(&self) -> String {
        self.inner.lock_run().stderr.clone()
    }

    /// Stop the child with `SIGSTOP` and fire the pause callback.
    ///
    /// Returns `false` without signalling when the child is not running or
    /// already paused.
    ///
    /// # Errors
    ///
    /// Propagates signal delivery failures.
    pub fn pause(&self) -> Result<bool, ProcessError> {
        self.transition(Phase::Running, Phase::Paused, Signal::SIGSTOP, &self.inner.on_pause)
    }

    /// Continue a paused child with `SIGCONT` and fire the resume callback.
    ///
    /// Returns `false` without signalling when the child is not paused.
    ///
    /// # Errors
    ///
    /// Propagates signal delivery failures.
    pub fn resume(&self) -> Result<bool, ProcessError> {
        self.transition(Phase::Paused, Phase::Running, Signal::SIGCONT, &self.inner.on_resume)
    }

    fn transition(
        &self,
        from: Phase,
        to: Phase,
        signal: Signal,
        slot: &Slot<LifecycleHandler>,
    ) -> Result<bool, ProcessError> {
        let pid = {
            let mut run = self.inner.lock_run();
            if run.phase != from {
                return Ok(false);
            }
            send_signal(run.state.pid, signal)?;
            run.phase = to;
            run.state.pid
        };
        slot.call(|handler| handler(&LifecycleEvent { pid }));
        Ok(true)
    }

    /// Signal the child, or the child and all its descendants.
    ///
    /// A paused child receiving a catchable termination signal is continued
    /// so the signal takes effect. Returns `false` when no child is running.
    ///
    /// # Errors
    ///
    /// Propagates delivery failures on the child itself.
    pub fn kill(&self, options: KillOptions) -> Result<bool, ProcessError> {
        let mut run = self.inner.lock_run();
        if !run.is_active() {
            return Ok(false);
        }
        let paused = run.phase == Phase::Paused;
        kill_process(run.state.pid, options, paused)?;
        let signal = options.signal;
        if paused
            && (signal == Signal::SIGCONT || (is_termination(signal) && is_catchable(signal)))
        {
            run.phase = Phase::Running;
        } else if signal == Signal::SIGSTOP {
            run.phase = Phase::Paused;
        }
        Ok(true)
    }
}

enum Launch {
    Spawned(Workers, Child),
    Failed(i32),
}

struct Workers {
    stdout_pump: Option<JoinHandle<bool>>,
    stderr_pump: Option<JoinHandle<bool>>,
    stdin_writer: Option<JoinHandle<io::Result<()>>>,
    timer: Option<Timer>,
    stdout_scratch: Option<File>,
}

struct Timer {
    cancel: Sender<()>,
    handle: JoinHandle<()>,
}

impl Timer {
    fn start(inner: Arc<Inner>, timeout: Duration) -> Self {
        let (cancel, rx) = mpsc::channel::<()>();
        let handle = thread::spawn(move || {
            if matches!(rx.recv_timeout(timeout), Err(RecvTimeoutError::Timeout)) {
                inner.fire_timeout();
            }
        });
        Self { cancel, handle }
    }

    fn cancel(self) {
        drop(self.cancel);
        if self.handle.join().is_err() {
            warn!("timeout thread panicked");
        }
    }
}

enum Exit {
    Status(ExitStatus),
    Code(i32),
    Lost,
}

#[derive(Debug, Default, Clone, Copy)]
struct Observed {
    stdout: bool,
    stderr: bool,
}

fn pump(inner: &Inner, stream: OutputStream, mut reader: PipeReader, pid: u32) -> bool {
    let spec = &inner.spec;
    let mut chunk = vec![0_u8; spec.buffer_size()];
    let mut decoder = Utf8Decoder::default();
    let mut lines = spec
        .line_buffered()
        .then(|| LineBuffer::new(spec.skip_blank_lines()));
    let mut observed = false;
    loop {
        let read = match reader.read(&mut chunk) {
            Ok(0) => break,
            Ok(read) => read,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => {
                warn!(pid, stream = stream.as_str(), %err, "pipe read failed; closing stream");
                break;
            }
        };
        observed = true;
        let timestamp = monotonic_ms();
        let text = decoder.decode(chunk.get(..read).unwrap_or_default());
        deliver(inner, pid, stream, lines.as_mut(), &text, timestamp);
    }
    let tail = decoder.finish();
    if !tail.is_empty() {
        deliver(inner, pid, stream, lines.as_mut(), &tail, monotonic_ms());
    }
    if let Some(line) = lines.as_mut().and_then(LineBuffer::finish) {
        let event = StreamEvent {
            pid,
            stream,
            data: line.text,
            timestamp: line.timestamp,
        };
        inner.emit(&event, true);
    }
    debug!(pid, stream = stream.as_str(), "stream reached EOF");
    observed
}

fn deliver(
    inner: &Inner,
    pid: u32,
    stream: OutputStream,
    lines: Option<&mut LineBuffer>,
    text: &str,
    timestamp: u64,
) {
    match lines {
        Some(buffer) => {
            for line in buffer.push(text, timestamp) {
                let event = StreamEvent {
                    pid,
                    stream,
                    data: line.text,
                    timestamp: line.timestamp,
                };
                inner.emit(&event, true);
            }
        }
        None if !text.is_empty() => {
            let event = StreamEvent {
                pid,
                stream,
                data: text.to_owned(),
                timestamp,
            };
            inner.emit(&event, false);
        }
        None => {}
    }
}

fn join_pump(handle: Option<JoinHandle<bool>>, stream: OutputStream) -> bool {
    let Some(handle) = handle else {
        return false;
    };
    handle.join().unwrap_or_else(|_| {
        warn!(stream = stream.as_str(), "output pump panicked");
        true
    })
}

/// Block until `pid` has exited without reaping it, so the pid stays
/// reserved until the run state says no more signals may be sent.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn await_exit(pid: u32) {
    use nix::{
        errno::Errno,
        sys::wait::{Id, WaitPidFlag, waitid},
        unistd::Pid,
    };
    let Ok(raw) = i32::try_from(pid) else {
        return;
    };
    let flags = WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT;
    while let Err(Errno::EINTR) = waitid(Id::Pid(Pid::from_raw(raw)), flags) {}
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
const fn await_exit(_pid: u32) {}

fn collect(inner: &Inner, workers: Workers, mut child: Child) -> (Exit, Observed) {
    let Workers {
        stdout_pump,
        stderr_pump,
        stdin_writer,
        timer,
        stdout_scratch,
    } = workers;
    let observed = Observed {
        stdout: join_pump(stdout_pump, OutputStream::Stdout),
        stderr: join_pump(stderr_pump, OutputStream::Stderr),
    };

    let pid = child.id();
    await_exit(pid);
    inner.lock_run().phase = Phase::Exiting;
    let exit = match child.wait() {
        Ok(status) => Exit::Status(status),
        Err(err) => {
            warn!(pid, %err, "failed to reap child");
            Exit::Lost
        }
    };
    if let Some(timer) = timer {
        timer.cancel();
    }
    join_stdin_writer(stdin_writer);

    if let Some(file) = stdout_scratch {
        match read_back(&file) {
            Ok(text) => inner.lock_run().stdout = text,
            Err(err) => warn!(pid, %err, "failed to read captured stdout"),
        }
    } else if let StdoutSink::File(file) = inner.spec.stdout() {
        rewind(file);
    }
    (exit, observed)
}

/// Inject the "Command not found" payload when a 127 exit left the relevant
/// error channel empty.
fn synthesize_not_found(inner: &Inner, observed: Observed) {
    let (pid, stream) = {
        let run = inner.lock_run();
        if run.state.exit_code != Some(EXIT_NOT_FOUND) {
            return;
        }
        let (stream, seen) = match inner.spec.stderr() {
            StderrPolicy::RedirectToStdout => (
                OutputStream::Stdout,
                observed.stdout || !run.stdout.is_empty(),
            ),
            StderrPolicy::Intercept | StderrPolicy::Inherit => (
                OutputStream::Stderr,
                observed.stderr || !run.stderr.is_empty(),
            ),
        };
        if seen {
            return;
        }
        (run.state.pid, stream)
    };
    let event = StreamEvent {
        pid,
        stream,
        data: NOT_FOUND_MESSAGE.to_owned(),
        timestamp: monotonic_ms(),
    };
    if !inner
        .data_slot(stream)
        .call_guarded(stream.as_str(), |handler| handler(&event))
    {
        inner.lock_run().buffer(stream).push_str(NOT_FOUND_MESSAGE);
    }
}

fn finalise(inner: &Inner, launch: Launch, promise: &Promise) {
    let (exit, observed) = match launch {
        Launch::Spawned(workers, child) => collect(inner, workers, child),
        Launch::Failed(code) => (Exit::Code(code), Observed::default()),
    };
    {
        let spec = &inner.spec;
        let mut run = inner.lock_run();
        let stdout = std::mem::take(&mut run.stdout);
        run.stdout = finish_output(stdout, spec.skip_blank_lines(), spec.trim());
        let stderr = std::mem::take(&mut run.stderr);
        run.stderr = finish_output(stderr, spec.skip_blank_lines(), spec.trim());
        match exit {
            Exit::Status(status) => run.state.record_exit(status),
            Exit::Code(code) => run.state.exit_code = Some(code),
            Exit::Lost => {}
        }
    }
    synthesize_not_found(inner, observed);

    let state = inner.lock_run().state.clone();
    inner.on_exit.call_guarded("exit", |handler| handler(&state));
    inner.lock_run().phase = Phase::Finished;
    debug!(pid = state.pid, exit_code = ?state.exit_code, timed_out = state.timed_out, "run finalised");
    promise.resolve(state);
}
