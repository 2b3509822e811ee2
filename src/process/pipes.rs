//! Stdin feeding shared by the supervisor and the sync runner.

use std::{
    io::{self, Write},
    process::ChildStdin,
    thread::{self, JoinHandle},
};

/// Write `text` to the child's stdin on a dedicated thread, closing the pipe
/// once done so the child sees EOF.
pub(crate) fn spawn_stdin_writer(mut stdin: ChildStdin, text: String) -> JoinHandle<io::Result<()>> {
    thread::spawn(move || stdin.write_all(text.as_bytes()))
}

/// Join the stdin writer.
///
/// A child that exits without reading all of its input closes the pipe early;
/// the resulting broken pipe is expected and only logged at debug level.
pub(crate) fn join_stdin_writer(handle: Option<JoinHandle<io::Result<()>>>) {
    let Some(handle) = handle else {
        return;
    };
    match handle.join() {
        Ok(Ok(())) => {}
        Ok(Err(err)) if err.kind() == io::ErrorKind::BrokenPipe => {
            tracing::debug!("child closed stdin before all input was written");
        }
        Ok(Err(err)) => tracing::warn!(%err, "failed to write child stdin"),
        Err(join_err) => tracing::warn!(?join_err, "stdin writer thread panicked"),
    }
}
