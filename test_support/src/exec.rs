//! Helpers for creating executable stubs in tests.
//!
//! These utilities write tiny shell scripts and mark them executable so tests
//! can stand in for `curl` (or any other program) without the real binary.
//! Callers own the containing directory's lifetime to keep the stub on disk.
//!
//! # Examples
//!
//! ```rust
//! use camino::Utf8Path;
//! use tempfile::TempDir;
//! use test_support::write_exec;
//!
//! let temp = TempDir::new().expect("tempdir");
//! let root = Utf8Path::from_path(temp.path()).expect("utf8 path");
//! let path = write_exec(root, "tool").expect("stub executable");
//! assert!(path.exists());
//! ```

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::os::unix::fs::PermissionsExt;

/// Write a minimal executable file named `name` inside `root`.
pub fn write_exec(root: &Utf8Path, name: &str) -> Result<Utf8PathBuf> {
    write_script(root, name, "")
}

/// Write an executable `/bin/sh` script named `name` with `body` as its
/// contents after the shebang.
pub fn write_script(root: &Utf8Path, name: &str, body: &str) -> Result<Utf8PathBuf> {
    let path = root.join(name);
    fs::write(path.as_std_path(), format!("#!/bin/sh\n{body}"))
        .with_context(|| format!("write exec stub {name}"))?;
    make_executable(&path)?;
    Ok(path)
}

/// Mark an existing file as executable.
pub fn make_executable(path: &Utf8Path) -> Result<()> {
    let mut perms = fs::metadata(path.as_std_path())
        .context("stat exec stub")?
        .permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path.as_std_path(), perms).context("chmod exec stub")?;
    Ok(())
}

/// Canned behaviour for a fake `curl`.
#[derive(Debug, Clone, Default)]
pub struct FakeCurl {
    /// Written to stderr, standing in for the `-D /dev/stderr` header dump.
    pub sideband: String,
    /// Written to stdout as the body.
    pub body: String,
    /// Exit status.
    pub exit_code: i32,
}

fn single_quoted(text: &str) -> String {
    format!("'{}'", text.replace('\'', r"'\''"))
}

/// Write a fake `curl` into `root` that records its arguments, one per line,
/// in `root/argv.txt` and then replays `fake`.
///
/// Returns the script path and the argument log path.
pub fn write_fake_curl(root: &Utf8Path, fake: &FakeCurl) -> Result<(Utf8PathBuf, Utf8PathBuf)> {
    let log = root.join("argv.txt");
    let body = format!(
        "for arg in \"$@\"; do printf '%s\\n' \"$arg\"; done > {log}\nprintf '%s' {sideband} >&2\nprintf '%s' {body}\nexit {code}\n",
        log = single_quoted(log.as_str()),
        sideband = single_quoted(&fake.sideband),
        body = single_quoted(&fake.body),
        code = fake.exit_code,
    );
    let script = write_script(root, "curl", &body)?;
    Ok((script, log))
}

/// Read the arguments recorded by [`write_fake_curl`].
pub fn recorded_args(log: &Utf8Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(log.as_std_path()).context("read recorded argv")?;
    Ok(text.lines().map(str::to_owned).collect())
}
