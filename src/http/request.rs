//! Request description for the curl transport.

use std::{fmt, fs::File, path::PathBuf, sync::Arc, time::Duration};

use indexmap::IndexMap;
use serde::Serialize;

use super::HttpResponse;

/// HTTP method. Anything unrecognised is coerced to `GET`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Method {
    /// `GET`
    #[default]
    Get,
    /// `POST`
    Post,
    /// `PUT`
    Put,
    /// `PATCH`
    Patch,
    /// `DELETE`
    Delete,
    /// `HEAD`
    Head,
    /// `OPTIONS`
    Options,
}

impl Method {
    /// Parse a method name case-insensitively, falling back to `GET`.
    ///
    /// # Examples
    /// ```
    /// use qel::http::Method;
    /// assert_eq!(Method::from_str_lossy("post"), Method::Post);
    /// assert_eq!(Method::from_str_lossy("BREW"), Method::Get);
    /// ```
    #[must_use]
    pub fn from_str_lossy(name: &str) -> Self {
        match name.trim().to_ascii_uppercase().as_str() {
            "POST" => Self::Post,
            "PUT" => Self::Put,
            "PATCH" => Self::Patch,
            "DELETE" => Self::Delete,
            "HEAD" => Self::Head,
            "OPTIONS" => Self::Options,
            _ => Self::Get,
        }
    }

    /// Canonical upper-case name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Patch => "PATCH",
            Self::Delete => "DELETE",
            Self::Head => "HEAD",
            Self::Options => "OPTIONS",
        }
    }

    /// Whether a request body is sent for this method.
    #[must_use]
    pub const fn accepts_body(self) -> bool {
        matches!(self, Self::Post | Self::Put | Self::Patch | Self::Delete)
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A header (or query parameter) value: one string or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum HeaderValue {
    /// A single value.
    Single(String),
    /// Repeated values in arrival order.
    Multiple(Vec<String>),
}

impl HeaderValue {
    /// All values in order.
    #[must_use]
    pub fn values(&self) -> &[String] {
        match self {
            Self::Single(value) => std::slice::from_ref(value),
            Self::Multiple(values) => values,
        }
    }

    /// First value, if any.
    #[must_use]
    pub fn first(&self) -> Option<&str> {
        self.values().first().map(String::as_str)
    }
}

impl From<&str> for HeaderValue {
    fn from(value: &str) -> Self {
        Self::Single(value.to_owned())
    }
}

impl From<String> for HeaderValue {
    fn from(value: String) -> Self {
        Self::Single(value)
    }
}

impl From<Vec<String>> for HeaderValue {
    fn from(values: Vec<String>) -> Self {
        Self::Multiple(values)
    }
}

impl<const N: usize> From<[&str; N]> for HeaderValue {
    fn from(values: [&str; N]) -> Self {
        Self::Multiple(values.iter().map(|value| (*value).to_owned()).collect())
    }
}

/// Request payload. At most one is sent; when several are configured the
/// earliest variant in declaration order wins.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestBody {
    /// URL-encoded form data, sent with `--data`.
    Data(String),
    /// JSON document, serialised and sent with JSON content headers.
    Json(serde_json::Value),
    /// File holding a JSON document, sent verbatim with JSON content headers.
    JsonFile(PathBuf),
    /// File uploaded as the multipart field `file`.
    File(PathBuf),
    /// Raw text sent verbatim.
    Body(String),
    /// File sent verbatim.
    BodyFile(PathBuf),
}

impl RequestBody {
    const fn precedence(&self) -> u8 {
        match self {
            Self::Data(_) => 0,
            Self::Json(_) => 1,
            Self::JsonFile(_) => 2,
            Self::File(_) => 3,
            Self::Body(_) => 4,
            Self::BodyFile(_) => 5,
        }
    }
}

/// Credentials. Basic beats bearer beats JWT when several are configured.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// `-u user:password`.
    Basic {
        /// User name.
        user: String,
        /// Password.
        password: String,
    },
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `Authorization: JWT <token>`.
    Jwt(String),
}

impl Auth {
    const fn precedence(&self) -> u8 {
        match self {
            Self::Basic { .. } => 0,
            Self::Bearer(_) => 1,
            Self::Jwt(_) => 2,
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Basic { user, .. } => f
                .debug_struct("Basic")
                .field("user", user)
                .field("password", &"***")
                .finish(),
            Self::Bearer(_) => f.write_str("Bearer(***)"),
            Self::Jwt(_) => f.write_str("Jwt(***)"),
        }
    }
}

/// Decides whether a conditional output file is written.
pub type OutputPredicate = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;

/// Where the response body goes.
#[derive(Clone, Default)]
pub enum OutputSink {
    /// Keep the body in memory on the response.
    #[default]
    Memory,
    /// Let curl write the body to this path.
    File(PathBuf),
    /// Write the body into an open file, rewound afterwards.
    Descriptor(Arc<File>),
    /// Buffer the body in a scratch file and copy it to `path` only when
    /// `predicate` accepts the completed response.
    Conditional {
        /// Destination path.
        path: PathBuf,
        /// Gate evaluated after the transfer.
        predicate: OutputPredicate,
    },
}

impl fmt::Debug for OutputSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Memory => f.write_str("Memory"),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
            Self::Descriptor(file) => f.debug_tuple("Descriptor").field(file).finish(),
            Self::Conditional { path, .. } => f
                .debug_struct("Conditional")
                .field("path", path)
                .finish_non_exhaustive(),
        }
    }
}

/// How repeated response headers are reported.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HeaderMode {
    /// Keep only the first value.
    String,
    /// Always report a list.
    Array,
    /// Report a single value, promoting to a list on the first duplicate.
    #[default]
    Auto,
}

/// Everything needed to assemble a curl invocation.
///
/// # Examples
/// ```
/// use qel::http::{HttpRequest, Method};
///
/// let request = HttpRequest::new("https://example.test/items")
///     .with_method(Method::Post)
///     .with_json(serde_json::json!({"title": "foo"}))
///     .with_query("page", "2");
/// assert_eq!(request.method(), Method::Post);
/// assert!(request.body().is_some());
/// ```
#[derive(Debug, Clone)]
pub struct HttpRequest {
    url: String,
    method: Method,
    user_agent: Option<String>,
    insecure: bool,
    headers: IndexMap<String, HeaderValue>,
    cookies: IndexMap<String, String>,
    follow_redirects: bool,
    max_redirects: Option<u32>,
    output: OutputSink,
    connect_timeout: Option<Duration>,
    max_time: Option<Duration>,
    bodies: Vec<RequestBody>,
    query: IndexMap<String, HeaderValue>,
    lowercase_headers: bool,
    header_mode: HeaderMode,
    parse_json: bool,
    fail_on_http_error: bool,
    auths: Vec<Auth>,
}

impl HttpRequest {
    /// `GET url`, following redirects, lower-casing response header names and
    /// parsing JSON bodies.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: Method::Get,
            user_agent: None,
            insecure: false,
            headers: IndexMap::new(),
            cookies: IndexMap::new(),
            follow_redirects: true,
            max_redirects: None,
            output: OutputSink::Memory,
            connect_timeout: None,
            max_time: None,
            bodies: Vec::new(),
            query: IndexMap::new(),
            lowercase_headers: true,
            header_mode: HeaderMode::Auto,
            parse_json: true,
            fail_on_http_error: false,
            auths: Vec::new(),
        }
    }

    /// Set the method.
    #[must_use]
    pub const fn with_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Set the `User-Agent`.
    #[must_use]
    pub fn with_user_agent(mut self, agent: impl Into<String>) -> Self {
        self.user_agent = Some(agent.into());
        self
    }

    /// Skip TLS certificate verification.
    #[must_use]
    pub const fn with_insecure(mut self, insecure: bool) -> Self {
        self.insecure = insecure;
        self
    }

    /// Set a request header. A list value sends the header once per entry.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Add a cookie to the aggregated `Cookie:` header.
    #[must_use]
    pub fn with_cookie(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.cookies.insert(name.into(), value.into());
        self
    }

    /// Follow redirects (the default) or stop at the first response.
    #[must_use]
    pub const fn with_follow_redirects(mut self, follow: bool) -> Self {
        self.follow_redirects = follow;
        self
    }

    /// Cap the number of redirects followed.
    #[must_use]
    pub const fn with_max_redirects(mut self, max: u32) -> Self {
        self.max_redirects = Some(max);
        self
    }

    /// Route the response body.
    #[must_use]
    pub fn with_output(mut self, sink: OutputSink) -> Self {
        self.output = sink;
        self
    }

    /// Limit connection establishment time.
    #[must_use]
    pub const fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Limit total transfer time.
    #[must_use]
    pub const fn with_max_time(mut self, timeout: Duration) -> Self {
        self.max_time = Some(timeout);
        self
    }

    /// Offer a body. Offering the same kind twice replaces the earlier one.
    #[must_use]
    pub fn with_body(mut self, body: RequestBody) -> Self {
        self.bodies
            .retain(|existing| existing.precedence() != body.precedence());
        self.bodies.push(body);
        self
    }

    /// Shorthand for [`RequestBody::Json`].
    #[must_use]
    pub fn with_json(self, value: serde_json::Value) -> Self {
        self.with_body(RequestBody::Json(value))
    }

    /// Shorthand for [`RequestBody::Data`].
    #[must_use]
    pub fn with_data(self, data: impl Into<String>) -> Self {
        self.with_body(RequestBody::Data(data.into()))
    }

    /// Add a query parameter. A list value is sent as repeated `key[]=` pairs.
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<HeaderValue>) -> Self {
        self.query.insert(key.into(), value.into());
        self
    }

    /// Lower-case response header names (the default).
    #[must_use]
    pub const fn with_lowercase_headers(mut self, lowercase: bool) -> Self {
        self.lowercase_headers = lowercase;
        self
    }

    /// Choose how repeated response headers are reported.
    #[must_use]
    pub const fn with_header_mode(mut self, mode: HeaderMode) -> Self {
        self.header_mode = mode;
        self
    }

    /// Parse `application/json` bodies (the default).
    #[must_use]
    pub const fn with_parse_json(mut self, parse: bool) -> Self {
        self.parse_json = parse;
        self
    }

    /// Treat non-2xx statuses as errors in [`CurlClient::fetch`](super::CurlClient::fetch).
    #[must_use]
    pub const fn with_fail_on_http_error(mut self, fail: bool) -> Self {
        self.fail_on_http_error = fail;
        self
    }

    /// Offer credentials. Offering the same kind twice replaces the earlier one.
    #[must_use]
    pub fn with_auth(mut self, auth: Auth) -> Self {
        self.auths
            .retain(|existing| existing.precedence() != auth.precedence());
        self.auths.push(auth);
        self
    }

    /// Target URL without the configured query parameters.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Method.
    #[must_use]
    pub const fn method(&self) -> Method {
        self.method
    }

    /// `User-Agent`, if set.
    #[must_use]
    pub fn user_agent(&self) -> Option<&str> {
        self.user_agent.as_deref()
    }

    /// Whether TLS verification is skipped.
    #[must_use]
    pub const fn insecure(&self) -> bool {
        self.insecure
    }

    /// Request headers.
    #[must_use]
    pub const fn headers(&self) -> &IndexMap<String, HeaderValue> {
        &self.headers
    }

    /// Request cookies.
    #[must_use]
    pub const fn cookies(&self) -> &IndexMap<String, String> {
        &self.cookies
    }

    /// Whether redirects are followed.
    #[must_use]
    pub const fn follow_redirects(&self) -> bool {
        self.follow_redirects
    }

    /// Redirect cap.
    #[must_use]
    pub const fn max_redirects(&self) -> Option<u32> {
        self.max_redirects
    }

    /// Body routing.
    #[must_use]
    pub const fn output(&self) -> &OutputSink {
        &self.output
    }

    /// Connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Option<Duration> {
        self.connect_timeout
    }

    /// Total transfer timeout.
    #[must_use]
    pub const fn max_time(&self) -> Option<Duration> {
        self.max_time
    }

    /// The body that will be sent, resolved by precedence, ignoring the
    /// method.
    #[must_use]
    pub fn body(&self) -> Option<&RequestBody> {
        self.bodies.iter().min_by_key(|body| body.precedence())
    }

    /// Query parameters.
    #[must_use]
    pub const fn query(&self) -> &IndexMap<String, HeaderValue> {
        &self.query
    }

    /// Whether response header names are lower-cased.
    #[must_use]
    pub const fn lowercase_headers(&self) -> bool {
        self.lowercase_headers
    }

    /// Repeated-header reporting mode.
    #[must_use]
    pub const fn header_mode(&self) -> HeaderMode {
        self.header_mode
    }

    /// Whether JSON bodies are parsed.
    #[must_use]
    pub const fn parse_json(&self) -> bool {
        self.parse_json
    }

    /// Whether non-2xx statuses are escalated.
    #[must_use]
    pub const fn fail_on_http_error(&self) -> bool {
        self.fail_on_http_error
    }

    /// The credentials that will be sent, resolved by precedence.
    #[must_use]
    pub fn auth(&self) -> Option<&Auth> {
        self.auths.iter().min_by_key(|auth| auth.precedence())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("get", Method::Get)]
    #[case(" Delete ", Method::Delete)]
    #[case("OPTIONS", Method::Options)]
    #[case("TRACE", Method::Get)]
    #[case("", Method::Get)]
    fn coerces_methods(#[case] input: &str, #[case] expected: Method) {
        assert_eq!(Method::from_str_lossy(input), expected);
    }

    #[test]
    fn body_precedence_is_fixed_regardless_of_order() {
        let request = HttpRequest::new("http://x")
            .with_body(RequestBody::BodyFile("b.bin".into()))
            .with_body(RequestBody::Body("raw".into()))
            .with_json(serde_json::json!({"a": 1}));
        assert!(matches!(request.body(), Some(RequestBody::Json(_))));

        let request = request.with_data("a=1");
        assert_eq!(request.body(), Some(&RequestBody::Data("a=1".into())));
    }

    #[test]
    fn basic_auth_beats_bearer_and_jwt() {
        let request = HttpRequest::new("http://x")
            .with_auth(Auth::Jwt("j".into()))
            .with_auth(Auth::Bearer("b".into()))
            .with_auth(Auth::Basic {
                user: "u".into(),
                password: "p".into(),
            });
        assert!(matches!(request.auth(), Some(Auth::Basic { .. })));
    }

    #[test]
    fn auth_debug_hides_secrets() {
        let rendered = format!(
            "{:?}",
            Auth::Basic {
                user: "bob".into(),
                password: "hunter2".into()
            }
        );
        assert!(rendered.contains("bob"));
        assert!(!rendered.contains("hunter2"));
    }

    #[test]
    fn header_value_exposes_values_in_order() {
        let value = HeaderValue::from(["a", "b"]);
        assert_eq!(value.values(), ["a", "b"]);
        assert_eq!(value.first(), Some("a"));
        assert_eq!(HeaderValue::from("x").values(), ["x"]);
    }
}
