//! Response model and the header-sideband parser.
//!
//! curl is invoked with `-D /dev/stderr`, so each response header block
//! arrives on stderr while the body goes to stdout. When redirects are
//! followed several blocks arrive back to back and the last one describes
//! the final response.

use std::{fmt, time::Duration};

use indexmap::{IndexMap, map::Entry};
use serde::Serialize;

use super::{Cookie, HeaderMode, HeaderValue, HttpError};

/// Parsed status line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusLine {
    /// Numeric status in `100..600`.
    pub code: u16,
    /// Reason phrase, never empty.
    pub text: String,
}

impl StatusLine {
    /// Whether the code is in `200..300`.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        matches!(self.code, 200..300)
    }
}

impl fmt::Display for StatusLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code, self.text)
    }
}

/// A response body held in memory.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ResponseBody {
    /// Raw text, including JSON that failed to parse.
    Text(String),
    /// Parsed `application/json` payload.
    Json(serde_json::Value),
}

impl ResponseBody {
    /// Interpret `text` according to the response content type.
    #[must_use]
    pub fn decode(text: String, content_type: Option<&str>, parse_json: bool) -> Self {
        let is_json = content_type
            .is_some_and(|kind| kind.trim().eq_ignore_ascii_case("application/json"));
        if parse_json && is_json {
            match serde_json::from_str(&text) {
                Ok(value) => return Self::Json(value),
                Err(err) => tracing::debug!(%err, "response declared JSON but did not parse"),
            }
        }
        Self::Text(text)
    }

    /// Text view of the body. JSON is re-serialised.
    #[must_use]
    pub fn to_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Json(value) => value.to_string(),
        }
    }

    /// Parsed JSON, when the body was decoded as such.
    #[must_use]
    pub const fn as_json(&self) -> Option<&serde_json::Value> {
        match self {
            Self::Json(value) => Some(value),
            Self::Text(_) => None,
        }
    }
}

/// Outcome of one curl invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HttpResponse {
    /// Final status line. `None` when curl failed before a response arrived.
    pub status: Option<StatusLine>,
    /// Headers of the final response block.
    pub headers: IndexMap<String, HeaderValue>,
    /// Cookies from every `Set-Cookie` header of the final block, by name.
    pub cookies: IndexMap<String, Cookie>,
    /// `Content-Type` without parameters.
    pub content_type: Option<String>,
    /// Body, when it was kept in memory.
    pub body: Option<ResponseBody>,
    /// Wall-clock time spent in curl.
    pub duration: Duration,
    /// curl gave up because a timeout elapsed.
    pub timed_out: bool,
    /// The request was cancelled.
    pub was_cancelled: bool,
    /// curl exited unsuccessfully.
    pub curl_failed: bool,
    /// curl's diagnostic starting at `curl:`.
    pub curl_error: Option<String>,
    /// curl's exit code (negative for a terminating signal).
    pub exit_code: Option<i32>,
}

impl HttpResponse {
    /// Whether a status was received and it lies outside `200..300`.
    #[must_use]
    pub fn http_failed(&self) -> bool {
        self.status.as_ref().is_some_and(|status| !status.is_success())
    }

    /// Status code, if any.
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        self.status.as_ref().map(|status| status.code)
    }

    /// First value of a response header, looked up case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, value)| value.first())
    }
}

/// The parts of the header sideband the transport needs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResponseHead {
    /// Status line of the last block.
    pub status: Option<StatusLine>,
    /// Headers of the last block, normalised per the request.
    pub headers: IndexMap<String, HeaderValue>,
    /// `Content-Type` of the last block without parameters.
    pub content_type: Option<String>,
    /// Raw `Set-Cookie` values of the last block in arrival order.
    pub set_cookies: Vec<String>,
}

/// Parse curl's header sideband.
///
/// Anything before the first `HTTP/` is discarded. Each `HTTP/` line opens a
/// new block that replaces the previous one.
///
/// # Examples
/// ```
/// use qel::http::{HeaderMode, parse_header_block};
///
/// let head = parse_header_block(
///     "HTTP/1.1 200 OK\r\nContent-Type: text/plain; charset=utf-8\r\n\r\n",
///     true,
///     HeaderMode::Auto,
/// )?;
/// assert_eq!(head.status.map(|s| s.code), Some(200));
/// assert_eq!(head.content_type.as_deref(), Some("text/plain"));
/// # Ok::<(), qel::http::HttpError>(())
/// ```
///
/// # Errors
///
/// Returns [`HttpError::Protocol`] when no status line is present or the
/// last one cannot be parsed.
pub fn parse_header_block(
    sideband: &str,
    lowercase: bool,
    mode: HeaderMode,
) -> Result<ResponseHead, HttpError> {
    let Some(start) = sideband.find("HTTP/") else {
        return Err(HttpError::Protocol {
            message: "no status line in response headers".to_owned(),
        });
    };
    let block = sideband.get(start..).unwrap_or_default();

    let mut head = ResponseHead::default();
    let mut status_line: Option<&str> = None;
    for line in block.split('\n').map(|line| line.trim_end_matches('\r')) {
        if line.starts_with("HTTP/") {
            status_line = Some(line);
            head = ResponseHead::default();
            continue;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim();
        if name.is_empty() {
            continue;
        }
        let value = value.trim();
        if name.eq_ignore_ascii_case("set-cookie") {
            head.set_cookies.push(value.to_owned());
        }
        if name.eq_ignore_ascii_case("content-type") && head.content_type.is_none() {
            let bare = value.split(';').next().unwrap_or_default().trim();
            head.content_type = Some(bare.to_owned());
        }
        let key = if lowercase {
            name.to_ascii_lowercase()
        } else {
            name.to_owned()
        };
        insert_header(&mut head.headers, key, value.to_owned(), mode);
    }

    let line = status_line.ok_or_else(|| HttpError::Protocol {
        message: "no status line in response headers".to_owned(),
    })?;
    head.status = Some(parse_status_line(line)?);
    Ok(head)
}

fn insert_header(
    headers: &mut IndexMap<String, HeaderValue>,
    key: String,
    value: String,
    mode: HeaderMode,
) {
    match headers.entry(key) {
        Entry::Vacant(slot) => {
            slot.insert(match mode {
                HeaderMode::Array => HeaderValue::Multiple(vec![value]),
                HeaderMode::String | HeaderMode::Auto => HeaderValue::Single(value),
            });
        }
        Entry::Occupied(_) if mode == HeaderMode::String => {}
        Entry::Occupied(mut slot) => {
            let existing = slot.get_mut();
            let mut values = match std::mem::replace(existing, HeaderValue::Multiple(Vec::new())) {
                HeaderValue::Single(first) => vec![first],
                HeaderValue::Multiple(values) => values,
            };
            values.push(value);
            *existing = HeaderValue::Multiple(values);
        }
    }
}

/// Parse `HTTP/<version> <code> <text>`.
///
/// HTTP/2 and later omit the reason phrase; the canonical one is filled in.
///
/// # Errors
///
/// Returns [`HttpError::Protocol`] when the code is missing, not numeric,
/// outside `100..600`, or the reason phrase is empty on HTTP/1.x.
pub fn parse_status_line(line: &str) -> Result<StatusLine, HttpError> {
    let malformed = || HttpError::Protocol {
        message: format!("malformed status line: {line:?}"),
    };
    let mut parts = line.trim().splitn(3, ' ');
    let version = parts.next().ok_or_else(malformed)?;
    let code: u16 = parts
        .next()
        .and_then(|code| code.trim().parse().ok())
        .ok_or_else(malformed)?;
    if !(100..600).contains(&code) {
        return Err(HttpError::Protocol {
            message: format!("status code {code} out of range in {line:?}"),
        });
    }
    let text = parts.next().map(str::trim).unwrap_or_default();
    let text = if text.is_empty() {
        if version.starts_with("HTTP/1") {
            return Err(malformed());
        }
        canonical_reason(code).to_owned()
    } else {
        text.to_owned()
    };
    Ok(StatusLine { code, text })
}

fn canonical_reason(code: u16) -> &'static str {
    match code {
        100 => "Continue",
        101 => "Switching Protocols",
        200 => "OK",
        201 => "Created",
        202 => "Accepted",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        303 => "See Other",
        304 => "Not Modified",
        307 => "Temporary Redirect",
        308 => "Permanent Redirect",
        400 => "Bad Request",
        401 => "Unauthorized",
        403 => "Forbidden",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        410 => "Gone",
        418 => "I'm a teapot",
        422 => "Unprocessable Entity",
        429 => "Too Many Requests",
        500 => "Internal Server Error",
        501 => "Not Implemented",
        502 => "Bad Gateway",
        503 => "Service Unavailable",
        504 => "Gateway Timeout",
        _ => "Unknown",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Result, ensure};
    use rstest::rstest;

    #[rstest]
    #[case("HTTP/1.1 200 OK", 200, "OK")]
    #[case("HTTP/2 418 I'm a teapot", 418, "I'm a teapot")]
    #[case("HTTP/1.1 404 Not Found", 404, "Not Found")]
    #[case("HTTP/2 204", 204, "No Content")]
    fn parses_status_lines(#[case] line: &str, #[case] code: u16, #[case] text: &str) -> Result<()> {
        let status = parse_status_line(line)?;
        ensure!(status.code == code, "code {}", status.code);
        ensure!(status.text == text, "text {:?}", status.text);
        Ok(())
    }

    #[rstest]
    #[case("HTTP/1.0 99 Too Low")]
    #[case("HTTP/1.1 600 Too High")]
    #[case("HTTP/1.1 abc Nope")]
    #[case("HTTP/1.1 200")]
    #[case("HTTP/1.1")]
    fn rejects_bad_status_lines(#[case] line: &str) {
        assert!(matches!(
            parse_status_line(line),
            Err(HttpError::Protocol { .. })
        ));
    }

    #[test]
    fn last_header_block_wins() -> Result<()> {
        let sideband = "\
HTTP/1.1 302 Found\r\nLocation: /next\r\nX-Hop: first\r\n\r\n\
HTTP/1.1 200 OK\r\nX-Hop: second\r\nContent-Type: application/json; charset=utf-8\r\n\r\n";
        let head = parse_header_block(sideband, true, HeaderMode::Auto)?;
        ensure!(head.status.as_ref().map(|s| s.code) == Some(200));
        ensure!(head.headers.get("x-hop") == Some(&HeaderValue::from("second")));
        ensure!(!head.headers.contains_key("location"));
        ensure!(head.content_type.as_deref() == Some("application/json"));
        Ok(())
    }

    #[test]
    fn noise_before_first_block_is_discarded() -> Result<()> {
        let head = parse_header_block("garbage: yes\nHTTP/1.1 200 OK\nA: 1\n", true, HeaderMode::Auto)?;
        ensure!(!head.headers.contains_key("garbage"));
        ensure!(head.headers.get("a") == Some(&HeaderValue::from("1")));
        Ok(())
    }

    #[test]
    fn missing_status_line_is_a_protocol_error() {
        assert!(matches!(
            parse_header_block("curl: (7) Failed to connect", true, HeaderMode::Auto),
            Err(HttpError::Protocol { .. })
        ));
    }

    #[rstest]
    #[case(HeaderMode::String, HeaderValue::from("1"))]
    #[case(HeaderMode::Array, HeaderValue::from(["1", "2"]))]
    #[case(HeaderMode::Auto, HeaderValue::from(["1", "2"]))]
    fn header_modes_handle_duplicates(
        #[case] mode: HeaderMode,
        #[case] expected: HeaderValue,
    ) -> Result<()> {
        let head = parse_header_block("HTTP/1.1 200 OK\r\nX-A: 1\r\nx-a: 2\r\n", true, mode)?;
        ensure!(head.headers.get("x-a") == Some(&expected), "{:?}", head.headers);
        Ok(())
    }

    #[test]
    fn array_mode_lists_single_headers() -> Result<()> {
        let head = parse_header_block("HTTP/1.1 200 OK\r\nX-A: 1\r\n", true, HeaderMode::Array)?;
        ensure!(head.headers.get("x-a") == Some(&HeaderValue::from(vec!["1".to_owned()])));
        Ok(())
    }

    #[test]
    fn header_names_keep_case_when_asked() -> Result<()> {
        let head = parse_header_block(
            "HTTP/1.1 200 OK\r\nX-Request-Id: abc\r\nSet-Cookie: a=1\r\nset-cookie: b=2\r\n",
            false,
            HeaderMode::Auto,
        )?;
        ensure!(head.headers.contains_key("X-Request-Id"));
        ensure!(head.set_cookies == ["a=1", "b=2"]);
        Ok(())
    }

    #[rstest]
    #[case(r#"{"a":1}"#, Some("application/json"), true, true)]
    #[case(r#"{"a":1}"#, Some("application/json"), false, false)]
    #[case("not json", Some("application/json"), true, false)]
    #[case(r#"{"a":1}"#, Some("text/plain"), true, false)]
    fn decodes_bodies(
        #[case] text: &str,
        #[case] content_type: Option<&str>,
        #[case] parse: bool,
        #[case] json: bool,
    ) {
        let body = ResponseBody::decode(text.to_owned(), content_type, parse);
        assert_eq!(body.as_json().is_some(), json);
        assert_eq!(body.to_text(), text);
    }

    #[test]
    fn http_failed_reflects_status() {
        let mut response = HttpResponse::default();
        assert!(!response.http_failed());
        response.status = Some(StatusLine {
            code: 404,
            text: "Not Found".into(),
        });
        assert!(response.http_failed());
    }
}
