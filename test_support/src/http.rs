//! Loopback HTTP fixtures for transport tests.
//!
//! [`spawn_http_server`] serves every connection with a caller-supplied
//! handler until the returned [`HttpServer`] is dropped. The listener runs in
//! non-blocking mode and each read is guarded by a deadline so a hung client
//! cannot stall the test suite. Helpers cover the scripted responses the
//! transport tests need: fixed bodies, JSON echo, redirects and errors.

use std::{
    io::{self, Read, Write},
    net::{SocketAddr, TcpListener, TcpStream},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

/// A parsed request as seen by the fixture.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Request {
    /// Request method.
    pub method: String,
    /// Request target including any query string.
    pub target: String,
    /// Headers in arrival order with their original names.
    pub headers: Vec<(String, String)>,
    /// Request body.
    pub body: String,
}

impl Request {
    /// First header named `name`, compared case-insensitively.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// A scripted response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    /// Status code.
    pub status: u16,
    /// Reason phrase.
    pub reason: String,
    /// Extra headers.
    pub headers: Vec<(String, String)>,
    /// Response body.
    pub body: String,
}

impl Response {
    /// `200 OK` with a plain-text body.
    #[must_use]
    pub fn ok(body: impl Into<String>) -> Self {
        Self::status(200, "OK").with_header("Content-Type", "text/plain").with_body(body)
    }

    /// `200 OK` with a JSON body.
    #[must_use]
    pub fn json(body: impl Into<String>) -> Self {
        Self::status(200, "OK")
            .with_header("Content-Type", "application/json; charset=utf-8")
            .with_body(body)
    }

    /// Empty response with the given status line.
    #[must_use]
    pub fn status(status: u16, reason: &str) -> Self {
        Self {
            status,
            reason: reason.to_owned(),
            headers: Vec::new(),
            body: String::new(),
        }
    }

    /// `302 Found` pointing at `location`.
    #[must_use]
    pub fn redirect(location: &str) -> Self {
        Self::status(302, "Found").with_header("Location", location)
    }

    /// Add a header.
    #[must_use]
    pub fn with_header(mut self, name: &str, value: &str) -> Self {
        self.headers.push((name.to_owned(), value.to_owned()));
        self
    }

    /// Replace the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    fn render(&self) -> String {
        let mut out = format!("HTTP/1.1 {} {}\r\n", self.status, self.reason);
        for (name, value) in &self.headers {
            out.push_str(&format!("{name}: {value}\r\n"));
        }
        out.push_str(&format!(
            "Content-Length: {}\r\nConnection: close\r\n\r\n{}",
            self.body.len(),
            self.body
        ));
        out
    }
}

/// Handle for a running fixture. Dropping it stops the accept loop and joins
/// the server thread.
#[derive(Debug)]
#[must_use]
pub struct HttpServer {
    handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
    addr: SocketAddr,
}

impl HttpServer {
    /// Base URL, e.g. `http://127.0.0.1:4321`.
    #[must_use]
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    /// Join the server thread and propagate any panic.
    pub fn join(mut self) -> thread::Result<()> {
        self.stop.store(true, Ordering::SeqCst);
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

impl Drop for HttpServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.handle.take() {
            drop(handle.join());
        }
    }
}

/// Serve every connection with `handler` until the server is dropped.
///
/// # Panics
///
/// Panics when the loopback listener cannot be bound.
pub fn spawn_http_server<F>(handler: F) -> HttpServer
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    let listener = TcpListener::bind(("127.0.0.1", 0)).expect("bind HTTP listener");
    listener
        .set_nonblocking(true)
        .expect("set listener non-blocking");
    let addr = listener.local_addr().expect("local addr");
    let stop = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&stop);
    let handler = Arc::new(handler);
    let handle = thread::spawn(move || accept_loop(&listener, &flag, &handler));
    HttpServer {
        handle: Some(handle),
        stop,
        addr,
    }
}

/// Server answering every request with `body` as `200 OK`.
pub fn spawn_fixed_server(body: impl Into<String>) -> HttpServer {
    let body = body.into();
    spawn_http_server(move |_| Response::ok(body.clone()))
}

/// Server echoing JSON request bodies back with an added `"id": 101`, the
/// way typical REST sandboxes do.
pub fn spawn_json_echo_server() -> HttpServer {
    spawn_http_server(|request| {
        let body = request.body.trim();
        let inner = body
            .strip_prefix('{')
            .and_then(|rest| rest.strip_suffix('}'))
            .unwrap_or_default()
            .trim();
        let echoed = if inner.is_empty() {
            "{\"id\":101}".to_owned()
        } else {
            format!("{{{inner},\"id\":101}}")
        };
        Response::json(echoed).with_header("X-Method", &request.method)
    })
}

/// Server with a small route table: `/redirect` sends a `302` to `/final`,
/// `/final` answers `200`, `/cookies` sets cookies, `/slow` sleeps before
/// answering and every other path is `404`.
pub fn spawn_routing_server() -> HttpServer {
    spawn_http_server(|request| {
        let path = request.target.split('?').next().unwrap_or_default();
        match path {
            "/redirect" => Response::redirect("/final").with_header("X-Hop", "first"),
            "/final" => Response::ok("arrived").with_header("X-Hop", "second"),
            "/cookies" => Response::ok("cookies")
                .with_header(
                    "Set-Cookie",
                    "session=abc%20123; Path=/; HttpOnly; Expires=Wed, 21 Oct 2037 07:28:00 GMT",
                )
                .with_header("Set-Cookie", "gone=x; Expires=Wed, 21 Oct 2015 07:28:00 GMT; Max-Age=0"),
            "/query" => Response::ok(request.target.clone()),
            "/slow" => {
                thread::sleep(Duration::from_secs(3));
                Response::ok("late")
            }
            _ => Response::status(404, "Not Found").with_body("missing"),
        }
    })
}

fn accept_loop<F>(listener: &TcpListener, stop: &AtomicBool, handler: &Arc<F>)
where
    F: Fn(&Request) -> Response + Send + Sync + 'static,
{
    let mut workers = Vec::new();
    while !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, _)) => {
                let handler = Arc::clone(handler);
                workers.push(thread::spawn(move || serve(stream, handler.as_ref())));
            }
            Err(err) if err.kind() == io::ErrorKind::WouldBlock => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(err) => panic!("failed to accept connection: {err}"),
        }
    }
    for worker in workers {
        drop(worker.join());
    }
}

fn serve<F>(mut stream: TcpStream, handler: &F)
where
    F: Fn(&Request) -> Response,
{
    let deadline = Instant::now() + Duration::from_secs(2);
    if stream.set_read_timeout(Some(Duration::from_millis(100))).is_err() {
        return;
    }
    let Some(request) = read_request(&mut stream, deadline) else {
        return;
    };
    let response = handler(&request);
    drop(stream.write_all(response.render().as_bytes()));
}

fn read_request(stream: &mut TcpStream, deadline: Instant) -> Option<Request> {
    let mut raw = Vec::new();
    let mut buf = [0_u8; 1024];
    loop {
        if let Some(request) = parse_request(&raw) {
            return Some(request);
        }
        if Instant::now() >= deadline {
            return None;
        }
        match stream.read(&mut buf) {
            Ok(0) => return parse_request(&raw),
            Ok(n) => raw.extend_from_slice(&buf[..n]),
            Err(err)
                if matches!(
                    err.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
                ) => {}
            Err(_) => return None,
        }
    }
}

/// Parse a complete request, or `None` while more bytes are needed.
fn parse_request(raw: &[u8]) -> Option<Request> {
    let text = String::from_utf8_lossy(raw);
    let (head, body) = text.split_once("\r\n\r\n")?;
    let mut lines = head.split("\r\n");
    let mut request_line = lines.next()?.split(' ');
    let method = request_line.next()?.to_owned();
    let target = request_line.next()?.to_owned();
    let headers: Vec<(String, String)> = lines
        .filter_map(|line| line.split_once(':'))
        .map(|(name, value)| (name.trim().to_owned(), value.trim().to_owned()))
        .collect();
    let length: usize = headers
        .iter()
        .find(|(name, _)| name.eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.parse().ok())
        .unwrap_or(0);
    if body.len() < length {
        return None;
    }
    Some(Request {
        method,
        target,
        headers,
        body: body.chars().take(length).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("GET / HTTP/1.1\r\nHost: x\r\n")]
    #[case("POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort")]
    fn incomplete_requests_need_more_bytes(#[case] raw: &str) {
        assert!(parse_request(raw.as_bytes()).is_none());
    }

    #[test]
    fn complete_request_is_parsed() {
        let raw = "POST /items?x=1 HTTP/1.1\r\nContent-Type: application/json\r\nContent-Length: 7\r\n\r\n{\"a\":1}";
        let request = parse_request(raw.as_bytes()).expect("complete request");
        assert_eq!(request.method, "POST");
        assert_eq!(request.target, "/items?x=1");
        assert_eq!(request.header("content-type"), Some("application/json"));
        assert_eq!(request.body, "{\"a\":1}");
    }

    #[test]
    fn rendered_response_carries_length_and_headers() {
        let text = Response::redirect("/next").with_body("moved").render();
        assert!(text.starts_with("HTTP/1.1 302 Found\r\n"));
        assert!(text.contains("Location: /next\r\n"));
        assert!(text.ends_with("Content-Length: 5\r\nConnection: close\r\n\r\nmoved"));
    }
}
