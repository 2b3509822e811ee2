//! Locating curl and checking that it is recent enough.

use std::{env, ffi::OsString, path::PathBuf};

use camino::Utf8PathBuf;
use qel_env::CURL_ENV;
use semver::Version;

use super::HttpError;

/// Program run when `QEL_CURL` is unset.
pub const CURL_PROGRAM: &str = "curl";

/// Oldest curl release whose options the transport relies on.
pub const MIN_CURL_VERSION: Version = Version::new(7, 68, 0);

fn resolve_curl_program_utf8_with<F>(mut read_env: F) -> Utf8PathBuf
where
    F: FnMut(&str) -> Option<OsString>,
{
    read_env(CURL_ENV)
        .and_then(|value| Utf8PathBuf::from_path_buf(PathBuf::from(value)).ok())
        .unwrap_or_else(|| Utf8PathBuf::from(CURL_PROGRAM))
}

/// The curl executable: `QEL_CURL` when set to a UTF-8 path, else `curl`.
#[must_use]
pub fn resolve_curl_program() -> Utf8PathBuf {
    resolve_curl_program_utf8_with(|key| env::var_os(key))
}

/// Extract the version from `curl --version` output.
///
/// # Examples
/// ```
/// use qel::http::parse_curl_version;
///
/// let version = parse_curl_version("curl 7.68.0 (x86_64-pc-linux-gnu) libcurl/7.68.0")?;
/// assert_eq!(version, semver::Version::new(7, 68, 0));
/// # Ok::<(), qel::http::HttpError>(())
/// ```
///
/// # Errors
///
/// Returns [`HttpError::UnknownVersion`] when the first line does not look
/// like `curl <version> ...`.
pub fn parse_curl_version(output: &str) -> Result<Version, HttpError> {
    let first = output.lines().next().unwrap_or_default().trim();
    let unknown = || HttpError::UnknownVersion {
        output: first.to_owned(),
    };
    let mut tokens = first.split_whitespace();
    if tokens.next() != Some("curl") {
        return Err(unknown());
    }
    let raw = tokens.next().ok_or_else(unknown)?;
    Version::parse(raw)
        .or_else(|_| Version::parse(&format!("{raw}.0")))
        .map_err(|_| unknown())
}

/// Reject versions older than [`MIN_CURL_VERSION`].
///
/// # Errors
///
/// Returns [`HttpError::UnsupportedVersion`] for older releases.
pub fn ensure_supported(found: Version) -> Result<Version, HttpError> {
    let comparable = Version::new(found.major, found.minor, found.patch);
    if comparable < MIN_CURL_VERSION {
        return Err(HttpError::UnsupportedVersion {
            found,
            minimum: MIN_CURL_VERSION,
        });
    }
    Ok(found)
}
