use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use httpflow::prelude::{
    CancelReason, Client, Context, Error, ErrorCode, ReadOnce, RedirectPolicy, debug_to,
};
use serde::Deserialize;

#[derive(Clone)]
struct MockResponse {
    status: u16,
    headers: Vec<(String, String)>,
    body: Vec<u8>,
}

impl MockResponse {
    fn new(
        status: u16,
        headers: Vec<(impl Into<String>, impl Into<String>)>,
        body: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            status,
            headers: headers
                .into_iter()
                .map(|(name, value)| (name.into(), value.into()))
                .collect(),
            body: body.into(),
        }
    }

    fn redirect(status: u16, location: impl Into<String>) -> Self {
        let location: String = location.into();
        Self::new(status, vec![("Location", location)], Vec::new())
    }
}

#[derive(Clone, Debug)]
struct CapturedRequest {
    method: String,
    path: String,
    headers: BTreeMap<String, String>,
    body: Vec<u8>,
}

struct MockServer {
    base_url: String,
    served: Arc<AtomicUsize>,
    captured: Arc<Mutex<Vec<CapturedRequest>>>,
    join: Option<JoinHandle<()>>,
}

impl MockServer {
    fn start(responses: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind mock server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let served = Arc::new(AtomicUsize::new(0));
        let captured = Arc::new(Mutex::new(Vec::new()));
        let served_clone = Arc::clone(&served);
        let captured_clone = Arc::clone(&captured);

        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(2);
            let mut response_index = 0;

            while response_index < responses.len() && Instant::now() < deadline {
                match listener.accept() {
                    Ok((mut stream, _)) => {
                        let _ = stream.set_nonblocking(false);
                        if let Ok(request) = read_request(&mut stream) {
                            captured_clone
                                .lock()
                                .expect("lock captured requests")
                                .push(request);
                        }

                        served_clone.fetch_add(1, Ordering::SeqCst);
                        let response = &responses[response_index];
                        response_index += 1;
                        let _ = write_response(&mut stream, response);
                    }
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            served,
            captured,
            join: Some(join),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn served_count(&self) -> usize {
        self.served.load(Ordering::SeqCst)
    }

    fn requests(&self) -> Vec<CapturedRequest> {
        self.captured
            .lock()
            .expect("lock captured requests")
            .clone()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

/// Accepts connections and never answers them.
struct HangingServer {
    base_url: String,
    stop: Arc<AtomicBool>,
    join: Option<JoinHandle<()>>,
}

impl HangingServer {
    fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind hanging server");
        let address = listener.local_addr().expect("read local address");
        listener
            .set_nonblocking(true)
            .expect("set listener nonblocking");

        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = Arc::clone(&stop);
        let join = thread::spawn(move || {
            let deadline = Instant::now() + Duration::from_secs(5);
            let mut held = Vec::new();
            while !stop_clone.load(Ordering::SeqCst) && Instant::now() < deadline {
                match listener.accept() {
                    Ok((stream, _)) => held.push(stream),
                    Err(error) if error.kind() == std::io::ErrorKind::WouldBlock => {
                        thread::sleep(Duration::from_millis(5));
                    }
                    Err(_) => break,
                }
            }
        });

        Self {
            base_url: format!("http://{address}"),
            stop,
            join: Some(join),
        }
    }
}

impl Drop for HangingServer {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            let _ = join.join();
        }
    }
}

fn find_header_end(raw: &[u8]) -> Option<usize> {
    raw.windows(4).position(|window| window == b"\r\n\r\n")
}

fn read_request(stream: &mut TcpStream) -> std::io::Result<CapturedRequest> {
    stream.set_read_timeout(Some(Duration::from_secs(1)))?;

    let mut raw = Vec::new();
    loop {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        raw.extend_from_slice(&chunk[..read]);
        if find_header_end(&raw).is_some() {
            break;
        }
    }

    let header_end = find_header_end(&raw).ok_or_else(|| {
        std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed request without header terminator",
        )
    })?;

    let header_text = String::from_utf8_lossy(&raw[..header_end]);
    let mut lines = header_text.split("\r\n");
    let request_line = lines.next().ok_or_else(|| {
        std::io::Error::new(std::io::ErrorKind::InvalidData, "missing request line")
    })?;
    let mut request_line_parts = request_line.split_whitespace();
    let method = request_line_parts.next().unwrap_or_default().to_owned();
    let path = request_line_parts.next().unwrap_or_default().to_owned();

    let mut headers = BTreeMap::new();
    for line in lines {
        if line.is_empty() {
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.insert(name.trim().to_ascii_lowercase(), value.trim().to_owned());
        }
    }

    let mut body = raw[header_end + 4..].to_vec();
    let chunked = headers
        .get("transfer-encoding")
        .is_some_and(|value| value.eq_ignore_ascii_case("chunked"));
    if chunked {
        while !body.ends_with(b"0\r\n\r\n") {
            let mut chunk = [0_u8; 1024];
            let read = stream.read(&mut chunk)?;
            if read == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..read]);
        }
        return Ok(CapturedRequest {
            method,
            path,
            headers,
            body: decode_chunked(&body),
        });
    }

    let content_length = headers
        .get("content-length")
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(0);
    while body.len() < content_length {
        let mut chunk = [0_u8; 1024];
        let read = stream.read(&mut chunk)?;
        if read == 0 {
            break;
        }
        body.extend_from_slice(&chunk[..read]);
    }
    body.truncate(content_length);

    Ok(CapturedRequest {
        method,
        path,
        headers,
        body,
    })
}

fn decode_chunked(mut raw: &[u8]) -> Vec<u8> {
    let mut decoded = Vec::new();
    while let Some(line_end) = raw.windows(2).position(|window| window == b"\r\n") {
        let size_text = String::from_utf8_lossy(&raw[..line_end]);
        let size = usize::from_str_radix(size_text.trim(), 16).unwrap_or(0);
        if size == 0 {
            break;
        }
        let start = line_end + 2;
        let end = (start + size).min(raw.len());
        decoded.extend_from_slice(&raw[start..end]);
        raw = &raw[(end + 2).min(raw.len())..];
    }
    decoded
}

fn write_response(stream: &mut TcpStream, response: &MockResponse) -> std::io::Result<()> {
    let body = &response.body;
    let mut raw = format!(
        "HTTP/1.1 {} {}\r\nContent-Length: {}\r\nConnection: close\r\n",
        response.status,
        status_text(response.status),
        body.len()
    );
    for (name, value) in &response.headers {
        raw.push_str(name);
        raw.push_str(": ");
        raw.push_str(value);
        raw.push_str("\r\n");
    }
    raw.push_str("\r\n");

    stream.write_all(raw.as_bytes())?;
    stream.write_all(body)?;
    stream.flush()
}

fn status_text(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        302 => "Found",
        303 => "See Other",
        307 => "Temporary Redirect",
        400 => "Bad Request",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn client_for(server_url: &str) -> Client {
    Client::builder()
        .base_url(server_url)
        .timeout(Duration::from_secs(2))
        .build()
        .expect("client should build")
}

#[derive(Debug, Default, Deserialize)]
struct Created {
    id: String,
}

#[test]
fn get_sends_repeated_query_values_and_default_accept() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/plain")],
        b"ok".to_vec(),
    )]);

    let mut response = client_for(&server.base_url)
        .get("/search")
        .query("q", ["x", "y"])
        .execute()
        .expect("get should succeed");
    assert_eq!(response.status().as_u16(), 200);
    assert_eq!(response.text_lossy().expect("read body"), "ok");

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/search?q=x&q=y");
    assert_eq!(requests[0].headers.get("accept").map(String::as_str), Some("*/*"));
    assert!(
        requests[0]
            .headers
            .get("user-agent")
            .is_some_and(|value| value.starts_with("httpflow/"))
    );
}

#[test]
fn post_json_decodes_result() {
    let server = MockServer::start(vec![MockResponse::new(
        201,
        vec![("Content-Type", "application/json")],
        br#"{"id":"item-1"}"#.to_vec(),
    )]);

    let mut created = Created::default();
    client_for(&server.base_url)
        .post("/v1/items")
        .json(&serde_json::json!({ "name": "demo" }))
        .decode_result(&mut created)
        .expect("post should succeed");
    assert_eq!(created.id, "item-1");

    let requests = server.requests();
    assert_eq!(requests[0].method, "POST");
    assert_eq!(requests[0].body, b"{\"name\":\"demo\"}\n");
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("application/json")
    );
    assert_eq!(
        requests[0].headers.get("content-length").map(String::as_str),
        Some("16")
    );
}

#[test]
fn multipart_upload_reaches_server() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        Vec::new(),
    )]);

    client_for(&server.base_url)
        .post("/upload")
        .multipart(|form| {
            form.set_boundary("test-boundary")
                .field_value("param1", "value1")
                .field_reader("data", ReadOnce(Cursor::new(b"streamed content".to_vec())))
                .file_from_memory("file", "report.json", Cursor::new(b"{}".to_vec()));
        })
        .execute()
        .expect("upload should succeed");

    let requests = server.requests();
    assert_eq!(
        requests[0].headers.get("content-type").map(String::as_str),
        Some("multipart/form-data; boundary=test-boundary")
    );
    let body = String::from_utf8_lossy(&requests[0].body).into_owned();
    assert_eq!(
        body,
        "--test-boundary\r\n\
         Content-Disposition: form-data; name=\"param1\"\r\n\
         \r\n\
         value1\r\n\
         --test-boundary\r\n\
         Content-Disposition: form-data; name=\"data\"\r\n\
         \r\n\
         streamed content\r\n\
         --test-boundary\r\n\
         Content-Disposition: form-data; name=\"file\"; filename=\"report.json\"\r\n\
         Content-Type: application/json\r\n\
         \r\n\
         {}\r\n\
         --test-boundary--\r\n"
    );
}

#[test]
fn response_view_reads_status_headers_and_json() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "application/json"), ("X-Request-Id", "r-1")],
        br#"{"ok":true}"#.to_vec(),
    )]);

    let mut view = client_for(&server.base_url)
        .get("/status")
        .response_view()
        .expect("request should succeed");
    assert_eq!(view.status_code().as_u16(), 200);
    assert_eq!(view.header("x-request-id"), Some("r-1"));
    let map = view.body_json_map().expect("json object body");
    assert_eq!(map.get("ok"), Some(&serde_json::Value::Bool(true)));
    assert!(matches!(view.body_bytes(), Err(Error::BodyConsumed)));
}

#[test]
fn cancelled_context_abandons_hanging_request() {
    let server = HangingServer::start();
    let client = client_for(&server.base_url);
    let (context, handle) = Context::background().with_cancel();

    let canceller = thread::spawn(move || {
        thread::sleep(Duration::from_millis(100));
        handle.cancel();
    });

    let started = Instant::now();
    let error = client
        .get("/slow")
        .with_context(context)
        .execute()
        .expect_err("cancelled request should fail");
    canceller.join().expect("join canceller");

    assert_eq!(error.code(), ErrorCode::Cancelled);
    assert_eq!(error.cancel_reason(), Some(CancelReason::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn context_deadline_stops_hanging_request() {
    let server = HangingServer::start();
    let client = client_for(&server.base_url);

    let started = Instant::now();
    let error = client
        .get("/slow")
        .with_context(Context::background().with_timeout(Duration::from_millis(150)))
        .execute()
        .expect_err("deadline should fail the request");

    assert_eq!(error.code(), ErrorCode::DeadlineExceeded);
    assert!(error.is_cancelled());
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn already_cancelled_context_never_connects() {
    let server = MockServer::start(Vec::new());
    let (context, handle) = Context::background().with_cancel();
    handle.cancel();

    let error = client_for(&server.base_url)
        .get("/never")
        .with_context(context)
        .execute()
        .expect_err("cancelled request should fail");
    assert_eq!(error.code(), ErrorCode::Cancelled);
    assert_eq!(server.served_count(), 0);
}

#[test]
fn exchange_timeout_is_reported() {
    let server = HangingServer::start();
    let client = Client::builder()
        .base_url(&server.base_url)
        .timeout(Duration::from_millis(200))
        .build()
        .expect("client should build");

    let error = client
        .get("/slow")
        .execute()
        .expect_err("hanging server should time out");
    assert_eq!(error.code(), ErrorCode::Timeout);
    assert!(!error.is_cancelled());
}

#[test]
fn temporary_redirect_replays_body() {
    let server = MockServer::start(vec![
        MockResponse::redirect(307, "/second"),
        MockResponse::new(200, vec![("Content-Type", "text/plain")], b"done".to_vec()),
    ]);

    let mut response = client_for(&server.base_url)
        .post("/first")
        .body(Cursor::new(b"payload".to_vec()))
        .execute()
        .expect("redirected post should succeed");
    assert_eq!(response.text_lossy().expect("read body"), "done");
    assert_eq!(
        response.url().map(|url| url.path()),
        Some("/second")
    );

    let requests = server.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].method, "POST");
    assert_eq!(requests[1].path, "/second");
    assert_eq!(requests[0].body, b"payload");
    assert_eq!(requests[1].body, b"payload");
}

#[test]
fn temporary_redirect_fails_for_stream_once_body() {
    let server = MockServer::start(vec![MockResponse::redirect(307, "/second")]);

    let error = client_for(&server.base_url)
        .post("/first")
        .body(ReadOnce(Cursor::new(b"payload".to_vec())))
        .execute()
        .expect_err("stream-once body cannot follow a 307");
    assert_eq!(error.code(), ErrorCode::RedirectBodyNotReplayable);
    assert_eq!(server.served_count(), 1);
}

#[test]
fn see_other_switches_to_get_without_body() {
    let server = MockServer::start(vec![
        MockResponse::redirect(303, "/result"),
        MockResponse::new(
            200,
            vec![("Content-Type", "application/json")],
            br#"{"id":"r"}"#.to_vec(),
        ),
    ]);

    let created: Created = client_for(&server.base_url)
        .post("/submit")
        .json(&serde_json::json!({ "a": 1 }))
        .result()
        .expect("see other should be followed");
    assert_eq!(created.id, "r");

    let requests = server.requests();
    assert_eq!(requests[1].method, "GET");
    assert_eq!(requests[1].path, "/result");
    assert!(requests[1].body.is_empty());
    assert!(!requests[1].headers.contains_key("content-type"));
}

#[test]
fn cross_origin_redirect_drops_authorization() {
    let target = MockServer::start(vec![MockResponse::new(
        200,
        Vec::<(String, String)>::new(),
        Vec::new(),
    )]);
    let origin = MockServer::start(vec![MockResponse::redirect(302, target.url("/landing"))]);

    client_for(&origin.base_url)
        .get("/start")
        .header("Authorization", ["Bearer secret"])
        .header("X-Trace", ["t-1"])
        .execute()
        .expect("redirect should be followed");

    assert_eq!(
        origin.requests()[0].headers.get("authorization").map(String::as_str),
        Some("Bearer secret")
    );
    let landed = target.requests();
    assert_eq!(landed[0].path, "/landing");
    assert!(!landed[0].headers.contains_key("authorization"));
    assert_eq!(landed[0].headers.get("x-trace").map(String::as_str), Some("t-1"));
}

#[test]
fn disabled_redirects_return_the_redirect_response() {
    let server = MockServer::start(vec![MockResponse::redirect(302, "/elsewhere")]);
    let client = Client::builder()
        .base_url(&server.base_url)
        .redirect_policy(RedirectPolicy::none())
        .build()
        .expect("client should build");

    let view = client
        .get("/start")
        .response_view()
        .expect("redirect response should be returned");
    assert_eq!(view.status_code().as_u16(), 302);
    assert_eq!(view.header("location"), Some("/elsewhere"));
}

#[test]
fn redirect_limit_is_enforced() {
    let server = MockServer::start(vec![
        MockResponse::redirect(302, "/a"),
        MockResponse::redirect(302, "/b"),
    ]);
    let client = Client::builder()
        .base_url(&server.base_url)
        .redirect_policy(RedirectPolicy::limited(1))
        .build()
        .expect("client should build");

    let error = client
        .get("/start")
        .execute()
        .expect_err("second redirect exceeds the limit");
    match error {
        Error::RequestFailed { source } => match *source {
            Error::RedirectLimitExceeded { max_redirects, .. } => assert_eq!(max_redirects, 1),
            other => panic!("unexpected error: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn response_body_limit_returns_specific_error() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/plain")],
        b"0123456789".to_vec(),
    )]);
    let client = Client::builder()
        .base_url(&server.base_url)
        .max_response_body_bytes(4)
        .build()
        .expect("client should build");

    let error = client
        .get("/large")
        .execute()
        .expect_err("response body should exceed max size");
    match error {
        Error::RequestFailed { source } => match *source {
            Error::ResponseBodyTooLarge {
                limit_bytes,
                actual_bytes,
                ..
            } => {
                assert_eq!(limit_bytes, 4);
                assert!(actual_bytes > limit_bytes);
            }
            other => panic!("unexpected error: {other}"),
        },
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn connection_refused_is_a_transport_error() {
    let address = {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind probe listener");
        listener.local_addr().expect("read local address")
    };
    let error = client_for(&format!("http://{address}"))
        .get("/")
        .execute()
        .expect_err("closed port should refuse");
    assert_eq!(error.code(), ErrorCode::Transport);
}

#[derive(Clone, Default)]
struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().expect("lock buffer").extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[test]
fn debug_middleware_dumps_wire_exchange() {
    let server = MockServer::start(vec![MockResponse::new(
        200,
        vec![("Content-Type", "text/plain")],
        b"pong".to_vec(),
    )]);
    let buffer = SharedBuffer::default();
    let client = Client::builder()
        .base_url(&server.base_url)
        .middleware(debug_to(true, buffer.clone()))
        .build()
        .expect("client should build");

    let mut response = client.get("/ping").execute().expect("ping should succeed");
    assert_eq!(response.text_lossy().expect("read body"), "pong");

    let output = String::from_utf8_lossy(&buffer.0.lock().expect("lock buffer")).into_owned();
    let host = server.base_url.trim_start_matches("http://");
    assert!(
        output.contains(&format!("[HTTP DEBUG] Request:\nGET /ping HTTP/1.1\nHost: {host}\n")),
        "{output}"
    );
    assert!(
        output.contains("[HTTP DEBUG] Response:\nHTTP/1.1 200 OK\n"),
        "{output}"
    );
    assert!(output.contains("Content-Type: text/plain\n"), "{output}");
    assert!(output.ends_with("pong\n"), "{output}");
}
