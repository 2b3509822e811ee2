//! Test utilities for process supervision and the curl transport.
//!
//! This crate provides executable stubs, including a scriptable fake
//! `curl`, and a loopback HTTP fixture server.

pub mod exec;
pub mod http;

pub use exec::{FakeCurl, make_executable, recorded_args, write_exec, write_fake_curl, write_script};

/// Whether a usable `curl` is on `PATH`.
#[must_use]
pub fn curl_available() -> bool {
    std::process::Command::new("curl")
        .arg("--version")
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .is_ok_and(|status| status.success())
}
