//! Argument redaction for logged command lines.
//!
//! Command lines are logged at `info` before a child is spawned. Credentials
//! travel on those command lines (`curl -u user:pass`, `Authorization:`
//! headers, `token=...` pairs), so everything passes through
//! [`redact_sensitive_args`] first.

use itertools::Itertools;

const REDACTED: &str = "***REDACTED***";

/// A single command-line argument as it will be logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandArg(String);

impl CommandArg {
    /// Wrap an argument.
    #[must_use]
    pub fn new(arg: impl Into<String>) -> Self {
        Self(arg.into())
    }

    /// Borrow the argument text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

fn is_sensitive_key(key: &str) -> bool {
    const SENSITIVE_KEYS: [&str; 7] = [
        "password",
        "token",
        "secret",
        "api_key",
        "apikey",
        "auth",
        "authorization",
    ];
    SENSITIVE_KEYS
        .iter()
        .any(|candidate| key.eq_ignore_ascii_case(candidate))
}

fn is_sensitive_header(name: &str) -> bool {
    ["authorization", "cookie", "proxy-authorization"]
        .iter()
        .any(|candidate| name.trim().eq_ignore_ascii_case(candidate))
}

fn is_credential_flag(arg: &str) -> bool {
    matches!(arg, "-u" | "--user" | "-U" | "--proxy-user")
}

/// Check whether `arg` is a `key=value` pair with a sensitive key.
///
/// # Examples
/// ```
/// use qel::redaction::{CommandArg, contains_sensitive_keyword};
/// assert!(contains_sensitive_keyword(&CommandArg::new("token=abc")));
/// assert!(!contains_sensitive_keyword(&CommandArg::new("path=/tmp")));
/// ```
#[must_use]
pub fn contains_sensitive_keyword(arg: &CommandArg) -> bool {
    arg.as_str()
        .split_once('=')
        .is_some_and(|(key, _)| is_sensitive_key(key.trim()))
}

/// Redact a single argument in isolation.
///
/// Sensitive `key=value` pairs keep their key; `Authorization:` and `Cookie:`
/// header arguments keep their header name.
///
/// # Examples
/// ```
/// use qel::redaction::{CommandArg, redact_argument};
/// let arg = CommandArg::new("token=abc");
/// assert_eq!(redact_argument(&arg).as_str(), "token=***REDACTED***");
/// let header = CommandArg::new("Authorization: Bearer abc");
/// assert_eq!(redact_argument(&header).as_str(), "Authorization: ***REDACTED***");
/// ```
#[must_use]
pub fn redact_argument(arg: &CommandArg) -> CommandArg {
    if let Some((name, _)) = arg.as_str().split_once(':')
        && is_sensitive_header(name)
    {
        return CommandArg::new(format!("{}: {REDACTED}", name.trim()));
    }
    if contains_sensitive_keyword(arg)
        && let Some((key, _)) = arg.as_str().split_once('=')
    {
        return CommandArg::new(format!("{}={REDACTED}", key.trim()));
    }
    arg.clone()
}

/// Redact sensitive information from all `args`.
///
/// The value following a credential flag (`-u`, `--user`) is always masked.
///
/// # Examples
/// ```
/// use qel::redaction::{CommandArg, redact_sensitive_args};
/// let args: Vec<_> = ["curl", "-u", "bob:hunter2", "https://example.test"]
///     .into_iter()
///     .map(CommandArg::new)
///     .collect();
/// let redacted = redact_sensitive_args(&args);
/// assert_eq!(redacted[2].as_str(), "***REDACTED***");
/// assert_eq!(redacted[3].as_str(), "https://example.test");
/// ```
#[must_use]
pub fn redact_sensitive_args(args: &[CommandArg]) -> Vec<CommandArg> {
    let mut mask_next = false;
    args.iter()
        .map(|arg| {
            if std::mem::take(&mut mask_next) {
                return CommandArg::new(REDACTED);
            }
            mask_next = is_credential_flag(arg.as_str());
            redact_argument(arg)
        })
        .collect()
}

/// Render `argv` as a single redacted line suitable for logging.
#[must_use]
pub fn redacted_command_line<S: AsRef<str>>(argv: &[S]) -> String {
    let args: Vec<CommandArg> = argv.iter().map(|arg| CommandArg::new(arg.as_ref())).collect();
    redact_sensitive_args(&args)
        .iter()
        .map(CommandArg::as_str)
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("token=abc", true)]
    #[case("  PASSWORD = value ", true)]
    #[case("secrets.yml", false)]
    #[case("path=/tmp/secrets.yml", false)]
    fn flags_only_known_keys(#[case] input: &str, #[case] expected: bool) {
        assert_eq!(contains_sensitive_keyword(&CommandArg::new(input)), expected);
    }

    #[rstest]
    #[case("auth = token123", "auth=***REDACTED***")]
    #[case("path=/var/secrets", "path=/var/secrets")]
    #[case("Cookie: session=abc", "Cookie: ***REDACTED***")]
    #[case("Accept: application/json", "Accept: application/json")]
    #[case("secret", "secret")]
    fn redacts_single_arguments(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(redact_argument(&CommandArg::new(input)).as_str(), expected);
    }

    #[test]
    fn masks_value_after_user_flag_only() {
        let line = redacted_command_line(&["curl", "--user", "a:b", "-u"]);
        assert_eq!(line, "curl --user ***REDACTED*** -u");
    }

    #[test]
    fn curl_command_line_hides_bearer_token() {
        let line = redacted_command_line(&[
            "curl",
            "-H",
            "Authorization: Bearer sekrit",
            "https://example.test/?q=1",
        ]);
        assert!(!line.contains("sekrit"), "leaked token in {line}");
        assert!(line.ends_with("https://example.test/?q=1"));
    }
}
