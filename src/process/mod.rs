//! Child process launching and supervision.
//!
//! A [`ProcessSpec`] describes what to launch and how its standard streams are
//! wired. [`Supervisor`] runs it asynchronously with streaming callbacks,
//! timeouts, pause/resume and (recursive) kill; [`run_sync`] runs it to
//! completion and returns the captured output.

mod command;
mod error;
mod events;
mod output;
mod pipes;
mod spec;
mod state;
mod supervisor;
mod sync;
mod wiring;

pub use command::{EXIT_NOT_EXECUTABLE, EXIT_NOT_FOUND, launch_argv};
pub use error::ProcessError;
pub use events::{LifecycleEvent, OutputStream, StreamEvent, monotonic_ms};
pub use output::{NOT_FOUND_MESSAGE, finish_output};
pub use spec::{
    DEFAULT_BUFFER_SIZE, DEFAULT_SETSID, DEFAULT_SHELL, EnvMode, Environment, ProcessSpec,
    StderrPolicy, StdinSource, StdoutSink,
};
pub use state::ProcessState;
pub use supervisor::{Completion, Supervisor};
pub use sync::{ProcessOutput, run_sync};
