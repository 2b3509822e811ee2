//! Value parsers for clap arguments.

use std::time::Duration;

use crate::signals::{Signal, signal_from_name};

/// Parse a non-negative number of seconds, fractions allowed.
pub(super) fn parse_seconds(s: &str) -> Result<Duration, String> {
    let trimmed = s.trim();
    let seconds: f64 = trimmed
        .parse()
        .map_err(|_| format!("{s} is not a valid number of seconds"))?;
    Duration::try_from_secs_f64(seconds).map_err(|_| format!("{s} is not a valid duration"))
}

/// Parse a signal name (`TERM`, `SIGTERM`) or number.
pub(super) fn parse_signal(s: &str) -> Result<Signal, String> {
    signal_from_name(s).ok_or_else(|| format!("unknown signal '{s}'"))
}

/// Parse a `Name: value` header.
pub(super) fn parse_header(s: &str) -> Result<(String, String), String> {
    let (name, value) = s
        .split_once(':')
        .ok_or_else(|| format!("header '{s}' must look like 'Name: value'"))?;
    let name = name.trim();
    if name.is_empty() {
        return Err(format!("header '{s}' has an empty name"));
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}

/// Parse a JSON document.
pub(super) fn parse_json(s: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(s).map_err(|err| format!("invalid JSON: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("2", Duration::from_secs(2))]
    #[case("0.5", Duration::from_millis(500))]
    #[case(" 0 ", Duration::ZERO)]
    fn parses_seconds(#[case] input: &str, #[case] expected: Duration) {
        assert_eq!(parse_seconds(input), Ok(expected));
    }

    #[rstest]
    #[case("-1")]
    #[case("soon")]
    #[case("NaN")]
    fn rejects_bad_seconds(#[case] input: &str) {
        assert!(parse_seconds(input).is_err());
    }

    #[test]
    fn parses_signals() {
        assert_eq!(parse_signal("int"), Ok(Signal::SIGINT));
        assert!(parse_signal("SIGNOPE").is_err());
    }

    #[rstest]
    #[case("Accept: text/plain", "Accept", "text/plain")]
    #[case("X-Empty:", "X-Empty", "")]
    #[case("X-Url: http://a:1/", "X-Url", "http://a:1/")]
    fn parses_headers(#[case] input: &str, #[case] name: &str, #[case] value: &str) {
        assert_eq!(parse_header(input), Ok((name.to_owned(), value.to_owned())));
    }

    #[rstest]
    #[case("no colon")]
    #[case(": value")]
    fn rejects_bad_headers(#[case] input: &str) {
        assert!(parse_header(input).is_err());
    }
}
