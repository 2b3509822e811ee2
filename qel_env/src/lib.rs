#![forbid(unsafe_code)]

//! Shared environment constants used across qel crates (library, tests, and
//! helpers).

/// Environment variable override for the curl executable driven by the HTTP
/// transport.
///
/// # Examples
///
/// ```
/// use qel_env::CURL_ENV;
/// assert_eq!(CURL_ENV, "QEL_CURL");
/// ```
pub const CURL_ENV: &str = "QEL_CURL";
