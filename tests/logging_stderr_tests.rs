//! Integration tests verifying that log output is written to stderr.
//!
//! These tests invoke the compiled binary and assert log messages appear on
//! stderr while stdout carries only the child's or server's payload.

use predicates::prelude::*;

/// A failing request logs its error to stderr and leaves stdout empty.
#[test]
fn main_logs_errors_to_stderr() {
    assert_cmd::cargo::cargo_bin_cmd!("qel")
        .env(qel_env::CURL_ENV, "/definitely/not/curl")
        .args(["http", "not a url"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("qel failed"))
        .stdout(predicate::str::is_empty());
}

/// Debug logs from the supervisor never interleave with the child's stdout.
#[test]
fn verbose_logging_stays_off_stdout() {
    assert_cmd::cargo::cargo_bin_cmd!("qel")
        .args(["-v", "exec", "--", "echo", "payload"])
        .assert()
        .success()
        .stdout("payload\n")
        .stderr(predicate::str::contains("running command"));
}
