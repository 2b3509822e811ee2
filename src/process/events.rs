//! Payloads handed to supervisor callbacks.

use std::{sync::OnceLock, time::Instant};

/// Which output stream produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputStream {
    /// Standard output.
    Stdout,
    /// Standard error.
    Stderr,
}

impl OutputStream {
    /// Lowercase stream name, for logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
        }
    }
}

/// A chunk (raw mode) or a single line (line-buffered mode) of output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamEvent {
    /// Pid of the child that wrote the data.
    pub pid: u32,
    /// Stream the data arrived on.
    pub stream: OutputStream,
    /// Decoded text. Lines carry no terminator.
    pub data: String,
    /// Monotonic milliseconds of the read that first produced this data.
    pub timestamp: u64,
}

/// Payload of pause and resume events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LifecycleEvent {
    /// Pid of the child.
    pub pid: u32,
}

/// Milliseconds elapsed on a process-wide monotonic clock.
///
/// The epoch is the first call, so values are only comparable within one
/// process.
#[must_use]
pub fn monotonic_ms() -> u64 {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    let elapsed = EPOCH.get_or_init(Instant::now).elapsed();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}
