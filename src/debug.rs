//! Wire-level dumps of each exchange, for troubleshooting.

use std::io::{Cursor, Read, Write};
use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, Version};
use tracing::debug as trace_debug;

use crate::Result;
use crate::body::{Body, ReadOnce};
use crate::error::Error;
use crate::middleware::{Handler, Middleware};
use crate::request::Request;
use crate::response::Response;
use crate::util::sorted_header_lines;

const SEPARATOR: &str = "------------------";

#[derive(Clone)]
enum Sink {
    Tracing,
    Writer(Arc<Mutex<Box<dyn Write + Send>>>),
}

impl Sink {
    fn emit(&self, text: &str) {
        match self {
            Self::Tracing => trace_debug!(target: "httpflow::debug", "{text}"),
            Self::Writer(writer) => {
                let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
                let _ = writer.write_all(text.as_bytes());
                let _ = writer.flush();
            }
        }
    }
}

/// Dumps every request and response as `debug` events with target `httpflow::debug`.
///
/// When `enabled` is false the link passes requests through untouched.
pub fn debug(enabled: bool) -> Middleware {
    dump_link(enabled, Sink::Tracing)
}

/// Like [`debug`], but writes the dumps to `writer`.
pub fn debug_to<W>(enabled: bool, writer: W) -> Middleware
where
    W: Write + Send + 'static,
{
    let writer: Box<dyn Write + Send> = Box::new(writer);
    dump_link(enabled, Sink::Writer(Arc::new(Mutex::new(writer))))
}

fn dump_link(enabled: bool, sink: Sink) -> Middleware {
    if !enabled {
        return Arc::new(|next: Handler| next);
    }
    Arc::new(move |next: Handler| -> Handler {
        let sink = sink.clone();
        Arc::new(move |request: &mut Request| {
            let dump = dump_request(request)?;
            sink.emit(&format!("[HTTP DEBUG] Request:\n{dump}\n"));

            let mut response = next(request)?;

            let dump = dump_response(&mut response)?;
            sink.emit(&format!("{SEPARATOR}\n[HTTP DEBUG] Response:\n{dump}\n"));
            Ok(response)
        })
    })
}

fn dump_request(request: &mut Request) -> Result<String> {
    let mut out = String::new();
    let target = request
        .url()
        .map(|url| match url.query() {
            Some(query) => format!("{}?{query}", url.path()),
            None => url.path().to_owned(),
        })
        .unwrap_or_else(|| "/".to_owned());
    out.push_str(&format!("{} {target} HTTP/1.1\n", request.method()));
    if let Some(host) = request.url().and_then(host_with_port) {
        out.push_str(&format!("Host: {host}\n"));
    }
    push_headers(&mut out, request.headers(), true);
    out.push('\n');

    let content = match request.body_mut() {
        Some(body) => Some(read_request_body(body)?),
        None => None,
    };
    if let Some(content) = content {
        out.push_str(&String::from_utf8_lossy(&content));
    }
    Ok(out)
}

/// Reads the content of `body` for display, leaving an equivalent body in place.
fn read_request_body(body: &mut Body) -> Result<Bytes> {
    if let Some(mut replay) = body.replay() {
        let mut content = Vec::new();
        replay
            .read_to_end(&mut content)
            .map_err(|source| Error::ReadBody { source })?;
        return Ok(Bytes::from(content));
    }

    let mut content = Vec::new();
    if let Some(mut reader) = body.take_reader() {
        reader
            .read_to_end(&mut content)
            .map_err(|source| Error::ReadBody { source })?;
    }
    let content = Bytes::from(content);
    *body = Body::from_source(ReadOnce(Cursor::new(content.clone())));
    Ok(content)
}

fn dump_response(response: &mut Response) -> Result<String> {
    let mut out = String::new();
    let status = response.status();
    out.push_str(&format!(
        "{} {} {}\n",
        version_text(response.version()),
        status.as_u16(),
        status.canonical_reason().unwrap_or("")
    ));
    push_headers(&mut out, response.headers(), false);
    out.push('\n');

    if let Some(mut reader) = response.take_body() {
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|source| Error::ReadResponseBody { source })?;
        out.push_str(&String::from_utf8_lossy(&content));
        response.set_body(Cursor::new(content));
    }
    Ok(out)
}

fn push_headers(out: &mut String, headers: &HeaderMap, skip_host: bool) {
    for (name, value) in sorted_header_lines(headers) {
        if skip_host && name.eq_ignore_ascii_case(HOST.as_str()) {
            continue;
        }
        out.push_str(&name);
        out.push_str(": ");
        out.push_str(&String::from_utf8_lossy(value.as_bytes()));
        out.push('\n');
    }
}

fn host_with_port(url: &url::Url) -> Option<String> {
    let host = url.host_str()?;
    Some(match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    })
}

fn version_text(version: Version) -> &'static str {
    match version {
        Version::HTTP_09 => "HTTP/0.9",
        Version::HTTP_10 => "HTTP/1.0",
        Version::HTTP_2 => "HTTP/2.0",
        Version::HTTP_3 => "HTTP/3.0",
        _ => "HTTP/1.1",
    }
}
