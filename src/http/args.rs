//! curl command-line assembly.
//!
//! Only options available in curl 7.68 are used.

use std::time::Duration;

use itertools::Itertools;

use super::{Auth, HttpRequest, Method, OutputSink, RequestBody, append_query};

/// Fixed prefix: ignore `~/.curlrc`, stay silent except for errors, and dump
/// response headers to stderr so stdout carries only the body.
pub const CURL_PREFIX: [&str; 4] = ["-q", "-sS", "-D", "/dev/stderr"];

const JSON_HEADERS: [&str; 4] = [
    "-H",
    "Content-Type: application/json",
    "-H",
    "Accept: application/json",
];

/// Arguments (excluding the program) for performing `request`.
///
/// # Examples
/// ```
/// use qel::http::{HttpRequest, curl_args};
///
/// let args = curl_args(&HttpRequest::new("http://x.test/").with_follow_redirects(false));
/// assert_eq!(args, ["-q", "-sS", "-D", "/dev/stderr", "-X", "GET", "http://x.test/"]);
/// ```
#[must_use]
pub fn curl_args(request: &HttpRequest) -> Vec<String> {
    let mut args: Vec<String> = CURL_PREFIX.iter().map(|arg| (*arg).to_owned()).collect();

    match request.method() {
        Method::Head => args.push("--head".to_owned()),
        method => push_pair(&mut args, "-X", method.as_str().to_owned()),
    }
    if let Some(agent) = request.user_agent() {
        push_pair(&mut args, "-A", agent.to_owned());
    }
    if request.insecure() {
        args.push("-k".to_owned());
    }
    for (name, value) in request.headers() {
        for item in value.values() {
            push_pair(&mut args, "-H", format!("{name}: {item}"));
        }
    }
    if !request.cookies().is_empty() {
        let cookie = request
            .cookies()
            .iter()
            .map(|(name, value)| format!("{name}={value}"))
            .join("; ");
        push_pair(&mut args, "-H", format!("Cookie: {cookie}"));
    }
    if request.follow_redirects() {
        args.push("-L".to_owned());
        if let Some(max) = request.max_redirects() {
            push_pair(&mut args, "--max-redirs", max.to_string());
        }
    }
    if let OutputSink::File(path) = request.output() {
        push_pair(&mut args, "-o", path.to_string_lossy().into_owned());
    }
    if let Some(timeout) = request.connect_timeout() {
        push_pair(&mut args, "--connect-timeout", seconds(timeout));
    }
    if let Some(timeout) = request.max_time() {
        push_pair(&mut args, "--max-time", seconds(timeout));
    }
    push_auth(&mut args, request.auth());
    if request.method().accepts_body() {
        push_body(&mut args, request.body());
    }
    args.push(append_query(request.url(), request.query()));
    args
}

fn push_pair(args: &mut Vec<String>, flag: &str, value: String) {
    args.push(flag.to_owned());
    args.push(value);
}

fn push_auth(args: &mut Vec<String>, auth: Option<&Auth>) {
    match auth {
        Some(Auth::Basic { user, password }) => {
            push_pair(args, "-u", format!("{user}:{password}"));
        }
        Some(Auth::Bearer(token)) => {
            push_pair(args, "-H", format!("Authorization: Bearer {token}"));
        }
        Some(Auth::Jwt(token)) => push_pair(args, "-H", format!("Authorization: JWT {token}")),
        None => {}
    }
}

fn push_body(args: &mut Vec<String>, body: Option<&RequestBody>) {
    let Some(body) = body else {
        return;
    };
    match body {
        RequestBody::Data(data) => push_pair(args, "--data", data.clone()),
        RequestBody::Json(value) => {
            args.extend(JSON_HEADERS.iter().map(|arg| (*arg).to_owned()));
            push_pair(args, "--data-raw", value.to_string());
        }
        RequestBody::JsonFile(path) => {
            args.extend(JSON_HEADERS.iter().map(|arg| (*arg).to_owned()));
            push_pair(args, "--data-binary", format!("@{}", path.display()));
        }
        RequestBody::File(path) => push_pair(args, "-F", format!("file=@{}", path.display())),
        RequestBody::Body(text) => push_pair(args, "--data-raw", text.clone()),
        RequestBody::BodyFile(path) => {
            push_pair(args, "--data-binary", format!("@{}", path.display()));
        }
    }
}

/// Render a duration the way curl's timeout options expect: whole seconds
/// when exact, otherwise decimal seconds.
fn seconds(duration: Duration) -> String {
    if duration.subsec_nanos() == 0 {
        duration.as_secs().to_string()
    } else {
        format!("{:.3}", duration.as_secs_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::{HeaderValue, RequestBody};

    fn tail(args: &[String]) -> &[String] {
        args.get(CURL_PREFIX.len()..).unwrap_or_default()
    }

    #[test]
    fn full_request_is_assembled_in_order() {
        let request = HttpRequest::new("https://api.test/items?x=1")
            .with_method(Method::Post)
            .with_user_agent("qel/1")
            .with_insecure(true)
            .with_header("X-Trace", HeaderValue::from(["a", "b"]))
            .with_cookie("sid", "abc")
            .with_cookie("theme", "dark")
            .with_max_redirects(3)
            .with_connect_timeout(Duration::from_secs(2))
            .with_max_time(Duration::from_millis(1500))
            .with_auth(Auth::Bearer("tok".into()))
            .with_data("a=1")
            .with_query("page", "2");
        let args = curl_args(&request);
        assert_eq!(
            tail(&args),
            [
                "-X",
                "POST",
                "-A",
                "qel/1",
                "-k",
                "-H",
                "X-Trace: a",
                "-H",
                "X-Trace: b",
                "-H",
                "Cookie: sid=abc; theme=dark",
                "-L",
                "--max-redirs",
                "3",
                "--connect-timeout",
                "2",
                "--max-time",
                "1.500",
                "-H",
                "Authorization: Bearer tok",
                "--data",
                "a=1",
                "https://api.test/items?x=1&page=2",
            ]
        );
    }

    #[test]
    fn basic_auth_suppresses_bearer() {
        let request = HttpRequest::new("http://x/")
            .with_auth(Auth::Bearer("tok".into()))
            .with_auth(Auth::Basic {
                user: "user".into(),
                password: "pass".into(),
            });
        let args = curl_args(&request);
        assert!(args.windows(2).any(|pair| pair == ["-u", "user:pass"]));
        assert!(!args.iter().any(|arg| arg.starts_with("Authorization")));
    }

    #[test]
    fn body_is_dropped_for_get_and_head() {
        for method in [Method::Get, Method::Head, Method::Options] {
            let request = HttpRequest::new("http://x/")
                .with_method(method)
                .with_data("a=1");
            let args = curl_args(&request);
            assert!(!args.iter().any(|arg| arg == "--data"), "{method} sent a body");
        }
    }

    #[test]
    fn head_uses_head_flag() {
        let args = curl_args(&HttpRequest::new("http://x/").with_method(Method::Head));
        assert!(args.contains(&"--head".to_owned()));
        assert!(!args.contains(&"-X".to_owned()));
    }

    #[test]
    fn json_body_adds_content_headers() {
        let request = HttpRequest::new("http://x/")
            .with_method(Method::Put)
            .with_follow_redirects(false)
            .with_json(serde_json::json!({"title": "foo"}));
        assert_eq!(
            tail(&curl_args(&request)),
            [
                "-X",
                "PUT",
                "-H",
                "Content-Type: application/json",
                "-H",
                "Accept: application/json",
                "--data-raw",
                r#"{"title":"foo"}"#,
                "http://x/",
            ]
        );
    }

    #[test]
    fn file_bodies_reference_paths() {
        let upload = curl_args(
            &HttpRequest::new("http://x/")
                .with_method(Method::Post)
                .with_body(RequestBody::File("/tmp/a.txt".into())),
        );
        assert!(upload.windows(2).any(|pair| pair == ["-F", "file=@/tmp/a.txt"]));

        let raw = curl_args(
            &HttpRequest::new("http://x/")
                .with_method(Method::Patch)
                .with_body(RequestBody::BodyFile("/tmp/b.bin".into())),
        );
        assert!(raw.windows(2).any(|pair| pair == ["--data-binary", "@/tmp/b.bin"]));
    }

    #[test]
    fn file_sink_adds_output_flag() {
        let args = curl_args(&HttpRequest::new("http://x/").with_output(OutputSink::File("/tmp/out".into())));
        assert!(args.windows(2).any(|pair| pair == ["-o", "/tmp/out"]));
    }
}
