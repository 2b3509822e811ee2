//! HTTP client that drives an external `curl` binary.
//!
//! Requests are assembled into a curl command line, run under the
//! [`Supervisor`](crate::process::Supervisor), and the response is rebuilt
//! from the header sideband curl writes to stderr plus the body on stdout.

mod args;
mod cookie;
mod error;
mod query;
mod request;
mod response;
mod transport;
mod version;

pub use args::{CURL_PREFIX, curl_args};
pub use cookie::{Cookie, parse_cookie, parse_cookie_date, parse_set_cookies, split_set_cookie};
pub use error::HttpError;
pub use query::{append_query, encode_query};
pub use request::{
    Auth, HeaderMode, HeaderValue, HttpRequest, Method, OutputPredicate, OutputSink, RequestBody,
};
pub use response::{
    HttpResponse, ResponseBody, ResponseHead, StatusLine, parse_header_block, parse_status_line,
};
pub use transport::{CURL_TIMEOUT_EXIT, CancelHandle, CurlClient, FetchOptions};
pub use version::{
    CURL_PROGRAM, MIN_CURL_VERSION, ensure_supported, parse_curl_version, resolve_curl_program,
};
