//! qel core library.
//!
//! This library supervises child processes (streaming or blocking, with
//! timeouts, pause/resume and recursive kills) and provides an HTTP client
//! built on an external `curl` binary driven by that supervisor.

#![cfg(unix)]

pub mod cli;
pub mod framing;
pub mod http;
pub mod kill;
pub mod process;
pub mod redaction;
pub mod signals;
