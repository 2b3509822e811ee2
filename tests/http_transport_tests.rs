//! Transport tests: argument assembly and failure handling against a scripted
//! fake curl, plus loopback round trips through the real binary when one is
//! installed.

use std::{sync::Arc, thread, time::Duration};

use anyhow::{Context, Result, bail, ensure};
use camino::Utf8Path;
use qel::http::{
    CURL_PREFIX, CancelHandle, CurlClient, FetchOptions, HttpError, HttpRequest, Method,
    OutputSink, ResponseBody,
};
use rstest::{fixture, rstest};
use serde_json::json;
use tempfile::TempDir;
use test_support::{
    FakeCurl, curl_available,
    http::{spawn_json_echo_server, spawn_routing_server},
    recorded_args, write_fake_curl,
};

const OK_SIDEBAND: &str =
    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nX-Trace: abc\r\n\r\n";

#[fixture]
fn workdir() -> TempDir {
    TempDir::new().expect("create temporary directory")
}

fn utf8(dir: &TempDir) -> Result<&Utf8Path> {
    Utf8Path::from_path(dir.path()).context("temporary directory is not UTF-8")
}

fn fake_client(dir: &TempDir, fake: &FakeCurl) -> Result<(CurlClient, camino::Utf8PathBuf)> {
    let (script, log) = write_fake_curl(utf8(dir)?, fake)?;
    Ok((CurlClient::new(script), log))
}

#[rstest]
fn fake_curl_receives_prefix_and_url_last(workdir: TempDir) -> Result<()> {
    let (client, log) = fake_client(
        &workdir,
        &FakeCurl {
            sideband: OK_SIDEBAND.to_owned(),
            body: "{\"ok\":true}".to_owned(),
            exit_code: 0,
        },
    )?;
    let request = HttpRequest::new("http://example.test/items")
        .with_method(Method::Post)
        .with_json(json!({"name": "qel"}))
        .with_query("page", "2");
    let response = client.execute(&request)?;

    let args = recorded_args(&log)?;
    ensure!(args.starts_with(&CURL_PREFIX.map(str::to_owned)), "argv: {args:?}");
    ensure!(args.last().map(String::as_str) == Some("http://example.test/items?page=2"));
    ensure!(args.windows(2).any(|pair| pair == ["-X", "POST"]));
    ensure!(args.iter().any(|arg| arg == "{\"name\":\"qel\"}"), "argv: {args:?}");

    ensure!(response.status_code() == Some(200));
    ensure!(response.header("x-trace") == Some("abc"));
    ensure!(response.content_type.as_deref() == Some("application/json"));
    let Some(ResponseBody::Json(body)) = &response.body else {
        bail!("expected JSON body, got {:?}", response.body);
    };
    ensure!(body == &json!({"ok": true}));
    Ok(())
}

#[rstest]
fn curl_failure_is_reported_on_the_response(workdir: TempDir) -> Result<()> {
    let (client, _) = fake_client(
        &workdir,
        &FakeCurl {
            sideband: "noise\ncurl: (7) Failed to connect to example.test port 80".to_owned(),
            body: String::new(),
            exit_code: 7,
        },
    )?;
    let request = HttpRequest::new("http://example.test/");
    let response = client.execute(&request)?;
    ensure!(response.curl_failed);
    ensure!(response.exit_code == Some(7));
    ensure!(
        response.curl_error.as_deref() == Some("curl: (7) Failed to connect to example.test port 80")
    );
    ensure!(response.status.is_none());

    match client.fetch(&request, FetchOptions::default()) {
        Err(HttpError::Transport {
            exit_code,
            timed_out,
            cancelled,
            ..
        }) => {
            ensure!(exit_code == Some(7));
            ensure!(!timed_out && !cancelled);
        }
        other => bail!("expected transport error, got {other:?}"),
    }
    Ok(())
}

#[rstest]
fn curl_timeout_exit_marks_response(workdir: TempDir) -> Result<()> {
    let (client, _) = fake_client(
        &workdir,
        &FakeCurl {
            sideband: "curl: (28) Operation timed out".to_owned(),
            body: String::new(),
            exit_code: 28,
        },
    )?;
    let response = client.execute(&HttpRequest::new("http://example.test/"))?;
    ensure!(response.timed_out);
    Ok(())
}

#[rstest]
fn missing_status_line_is_a_protocol_error(workdir: TempDir) -> Result<()> {
    let (client, _) = fake_client(
        &workdir,
        &FakeCurl {
            sideband: "garbage without a status\n".to_owned(),
            body: "body".to_owned(),
            exit_code: 0,
        },
    )?;
    let request = HttpRequest::new("http://example.test/");
    ensure!(matches!(
        client.execute(&request),
        Err(HttpError::Protocol { .. })
    ));
    let lenient = client.fetch(&request, FetchOptions { ignore_error: true })?;
    ensure!(lenient.status.is_none());
    ensure!(lenient.body == Some(ResponseBody::Text("body".to_owned())));
    Ok(())
}

#[rstest]
fn error_status_escalates_only_on_request(workdir: TempDir) -> Result<()> {
    let (client, _) = fake_client(
        &workdir,
        &FakeCurl {
            sideband: "HTTP/1.1 503 Service Unavailable\r\n\r\n".to_owned(),
            body: "down".to_owned(),
            exit_code: 0,
        },
    )?;
    let lenient = HttpRequest::new("http://example.test/");
    let response = client.execute(&lenient)?;
    ensure!(response.http_failed());

    let strict = lenient.with_fail_on_http_error(true);
    let err = client
        .execute(&strict)
        .err()
        .context("503 should be an error when failing on HTTP errors")?;
    ensure!(err.status().map(|status| status.code) == Some(503));
    ensure!(client.fetch(&strict, FetchOptions { ignore_error: true }).is_ok());
    Ok(())
}

#[rstest]
#[case("curl 7.50.0 (x86_64-pc-linux-gnu) libcurl/7.50.0", true)]
#[case("curl 8.5.0 (x86_64-pc-linux-gnu) libcurl/8.5.0", false)]
fn version_probe_enforces_minimum(
    workdir: TempDir,
    #[case] banner: &str,
    #[case] too_old: bool,
) -> Result<()> {
    let (client, _) = fake_client(
        &workdir,
        &FakeCurl {
            body: format!("{banner}\nProtocols: http https\n"),
            ..FakeCurl::default()
        },
    )?;
    match client.probe_version() {
        Err(HttpError::UnsupportedVersion { found, .. }) if too_old => {
            ensure!(found == semver::Version::new(7, 50, 0));
        }
        Ok(version) if !too_old => ensure!(version == semver::Version::new(8, 5, 0)),
        other => bail!("unexpected probe result {other:?}"),
    }
    Ok(())
}

#[test]
fn invalid_url_never_runs_curl() -> Result<()> {
    let client = CurlClient::new("/definitely/not/curl");
    ensure!(matches!(
        client.execute(&HttpRequest::new("not a url")),
        Err(HttpError::InvalidUrl { .. })
    ));
    Ok(())
}

macro_rules! require_curl {
    () => {
        if !curl_available() {
            return Ok(());
        }
    };
}

fn real_client() -> CurlClient {
    CurlClient::new("curl")
}

#[test]
fn json_post_round_trips_through_echo_server() -> Result<()> {
    require_curl!();
    let server = spawn_json_echo_server();
    let request = HttpRequest::new(format!("{}/posts", server.url()))
        .with_method(Method::Post)
        .with_json(json!({"title": "foo", "userId": 1}));
    let response = real_client().execute(&request)?;
    ensure!(response.status_code() == Some(200));
    ensure!(response.header("x-method") == Some("POST"));
    let body = response
        .body
        .as_ref()
        .and_then(ResponseBody::as_json)
        .context("JSON body")?;
    ensure!(body == &json!({"title": "foo", "userId": 1, "id": 101}), "body: {body}");
    Ok(())
}

#[test]
fn fetch_all_preserves_input_order() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let requests: Vec<_> = ["a", "b", "c", "d"]
        .iter()
        .map(|tag| HttpRequest::new(format!("{}/query", server.url())).with_query("tag", *tag))
        .collect();
    let results = real_client().fetch_all(&requests);
    ensure!(results.len() == 4);
    for (result, tag) in results.into_iter().zip(["a", "b", "c", "d"]) {
        let response = result?;
        let text = response.body.map(|body| body.to_text()).unwrap_or_default();
        ensure!(text == format!("/query?tag={tag}"), "got {text}");
    }
    Ok(())
}

#[test]
fn not_found_fails_when_requested() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let request =
        HttpRequest::new(format!("{}/nowhere", server.url())).with_fail_on_http_error(true);
    match real_client().execute(&request) {
        Err(HttpError::Status { status, body }) => {
            ensure!(status.code == 404);
            ensure!(status.text == "Not Found");
            ensure!(body.map(|b| b.to_text()).as_deref() == Some("missing"));
        }
        other => bail!("expected 404 status error, got {other:?}"),
    }
    Ok(())
}

#[test]
fn redirects_report_the_last_response() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let response = real_client().execute(&HttpRequest::new(format!("{}/redirect", server.url())))?;
    ensure!(response.status_code() == Some(200));
    ensure!(response.header("x-hop") == Some("second"));
    ensure!(response.body.map(|b| b.to_text()).as_deref() == Some("arrived"));
    Ok(())
}

#[test]
fn redirects_can_be_left_unfollowed() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let request =
        HttpRequest::new(format!("{}/redirect", server.url())).with_follow_redirects(false);
    let response = real_client().execute(&request)?;
    ensure!(response.status_code() == Some(302));
    ensure!(response.header("location") == Some("/final"));
    Ok(())
}

#[test]
fn set_cookie_headers_are_parsed() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let response = real_client().execute(&HttpRequest::new(format!("{}/cookies", server.url())))?;
    let session = response.cookies.get("session").context("session cookie")?;
    ensure!(session.value == "abc 123");
    ensure!(session.http_only);
    ensure!(session.path.as_deref() == Some("/"));
    ensure!(session.expires.map(|at| at.year()) == Some(2037));
    let gone = response.cookies.get("gone").context("expired cookie")?;
    ensure!(gone.max_age == Some(0));
    ensure!(gone.expires.is_none());
    Ok(())
}

#[rstest]
#[case("/final", true)]
#[case("/nowhere", false)]
fn conditional_output_is_written_only_when_accepted(
    workdir: TempDir,
    #[case] path: &str,
    #[case] written: bool,
) -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let target = workdir.path().join("body.txt");
    let request = HttpRequest::new(format!("{}{path}", server.url())).with_output(
        OutputSink::Conditional {
            path: target.clone(),
            predicate: Arc::new(|response| !response.http_failed()),
        },
    );
    let response = real_client().execute(&request)?;
    ensure!(response.body.is_none());
    ensure!(target.exists() == written);
    if written {
        ensure!(std::fs::read_to_string(&target)? == "arrived");
    }
    Ok(())
}

#[rstest]
fn file_output_bypasses_memory(workdir: TempDir) -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let target = workdir.path().join("saved.txt");
    let request = HttpRequest::new(format!("{}/final", server.url()))
        .with_output(OutputSink::File(target.clone()));
    let response = real_client().execute(&request)?;
    ensure!(response.status_code() == Some(200));
    ensure!(response.body.is_none());
    ensure!(std::fs::read_to_string(&target)? == "arrived");
    Ok(())
}

#[test]
fn max_time_reports_timeout() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let request = HttpRequest::new(format!("{}/slow", server.url()))
        .with_max_time(Duration::from_millis(500));
    let response = real_client().execute(&request)?;
    ensure!(response.curl_failed);
    ensure!(response.timed_out, "response: {response:?}");
    ensure!(response.exit_code == Some(28));
    Ok(())
}

#[test]
fn cancel_interrupts_in_flight_request() -> Result<()> {
    require_curl!();
    let server = spawn_routing_server();
    let cancel = CancelHandle::default();
    let remote = cancel.clone();
    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(300));
        remote.cancel()
    });
    let request = HttpRequest::new(format!("{}/slow", server.url()));
    let response = real_client().execute_with_cancel(&request, &cancel)?;
    let signalled = canceller
        .join()
        .map_err(|_| anyhow::anyhow!("canceller panicked"))??;
    ensure!(signalled);
    ensure!(response.was_cancelled, "response: {response:?}");
    ensure!(response.exit_code == Some(-15));
    Ok(())
}

#[test]
fn cancel_before_start_short_circuits() -> Result<()> {
    let cancel = CancelHandle::default();
    ensure!(!cancel.cancel()?);
    let response = CurlClient::new("/definitely/not/curl")
        .execute_with_cancel(&HttpRequest::new("http://example.test/"), &cancel)?;
    ensure!(response.was_cancelled);
    ensure!(response.curl_failed);
    Ok(())
}

#[test]
fn installed_curl_is_supported() -> Result<()> {
    require_curl!();
    let version = real_client().probe_version()?;
    ensure!(version >= qel::http::MIN_CURL_VERSION);
    Ok(())
}
