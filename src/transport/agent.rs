use std::io::Read;
use std::time::Duration;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, CONTENT_LENGTH};
use http::{HeaderMap, Method, StatusCode, Version};

use crate::Result;
use crate::body::BodyReader;
use crate::config::TransportConfig;
use crate::error::{Error, TransportErrorKind};
use crate::tls::build_tls_config;

pub(super) fn make_agent(config: &TransportConfig) -> Result<ureq::Agent> {
    let proxy = match &config.proxy {
        Some(proxy_url) => Some(ureq::Proxy::new(proxy_url).map_err(|_| Error::InvalidProxy {
            url: proxy_url.clone(),
        })?),
        None => None,
    };
    let tls_config = build_tls_config(config.client_identity.as_ref())?;
    let agent_config = ureq::Agent::config_builder()
        .http_status_as_error(false)
        .max_redirects(0)
        .user_agent(config.user_agent.as_str())
        .tls_config(tls_config)
        .proxy(proxy)
        .build();
    Ok(agent_config.new_agent())
}

/// One request on the wire, without redirect handling.
pub(super) struct Attempt {
    pub(super) method: Method,
    pub(super) uri: String,
    pub(super) redacted_uri: String,
    pub(super) headers: HeaderMap,
    pub(super) body: Option<BodyReader>,
    pub(super) timeout: Duration,
    pub(super) connect_timeout: Duration,
    pub(super) max_response_body_bytes: usize,
}

/// A response read to completion.
pub(super) struct Exchange {
    pub(super) status: StatusCode,
    pub(super) version: Version,
    pub(super) headers: HeaderMap,
    pub(super) body: Bytes,
}

pub(super) fn run_attempt(agent: &ureq::Agent, attempt: Attempt) -> Result<Exchange> {
    let Attempt {
        method,
        uri,
        redacted_uri,
        headers,
        body,
        timeout,
        connect_timeout,
        max_response_body_bytes,
    } = attempt;

    let mut builder = ureq::http::Request::builder()
        .method(method.clone())
        .uri(uri.as_str());
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }

    let mut response = match body {
        Some(reader) => {
            let request = builder
                .body(ureq::SendBody::from_owned_reader(reader))
                .map_err(|source| Error::RequestBuild { source })?;
            run_configured_request(
                agent,
                request,
                timeout,
                connect_timeout,
                &method,
                &redacted_uri,
            )?
        }
        None => {
            let request = builder
                .body(())
                .map_err(|source| Error::RequestBuild { source })?;
            run_configured_request(
                agent,
                request,
                timeout,
                connect_timeout,
                &method,
                &redacted_uri,
            )?
        }
    };

    let status = response.status();
    let version = response.version();
    let mut response_headers = response.headers().clone();
    let body = match read_all_body_limited(&mut response, max_response_body_bytes) {
        Ok(body) => body,
        Err(ReadBodyError::TooLarge { actual_bytes }) => {
            return Err(Error::ResponseBodyTooLarge {
                limit_bytes: max_response_body_bytes,
                actual_bytes,
                method,
                uri: redacted_uri,
            });
        }
        Err(ReadBodyError::Read(source)) => {
            if let Some(ureq::Error::Timeout(_)) = wrapped_ureq_error(&source) {
                return Err(Error::Timeout {
                    timeout_ms: timeout.as_millis(),
                    method,
                    uri: redacted_uri,
                });
            }
            return Err(Error::Transport {
                kind: TransportErrorKind::Read,
                method,
                uri: redacted_uri,
                source: Box::new(source),
            });
        }
    };

    if is_decoded_encoding(&response_headers) {
        response_headers.remove(CONTENT_ENCODING);
        response_headers.remove(CONTENT_LENGTH);
    }

    Ok(Exchange {
        status,
        version,
        headers: response_headers,
        body,
    })
}

fn run_configured_request<S: ureq::AsSendBody>(
    agent: &ureq::Agent,
    request: ureq::http::Request<S>,
    timeout: Duration,
    connect_timeout: Duration,
    method: &Method,
    redacted_uri: &str,
) -> Result<ureq::http::Response<ureq::Body>> {
    let configured_request = agent
        .configure_request(request)
        .timeout_global(Some(timeout))
        .timeout_connect(Some(connect_timeout.min(timeout)))
        .build();

    agent
        .run(configured_request)
        .map_err(|source| match source {
            ureq::Error::Timeout(_) => Error::Timeout {
                timeout_ms: timeout.as_millis(),
                method: method.clone(),
                uri: redacted_uri.to_owned(),
            },
            other => Error::Transport {
                kind: classify_ureq_transport_error(&other),
                method: method.clone(),
                uri: redacted_uri.to_owned(),
                source: Box::new(other),
            },
        })
}

/// Whether ureq already decoded the body, leaving the encoding headers stale.
fn is_decoded_encoding(headers: &HeaderMap) -> bool {
    headers
        .get(CONTENT_ENCODING)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|encoding| encoding.trim().eq_ignore_ascii_case("gzip"))
}

pub(super) fn classify_ureq_transport_error(error: &ureq::Error) -> TransportErrorKind {
    match error {
        ureq::Error::HostNotFound => TransportErrorKind::Dns,
        ureq::Error::Tls(_) | ureq::Error::Rustls(_) | ureq::Error::Pem(_) => {
            TransportErrorKind::Tls
        }
        ureq::Error::ConnectProxyFailed(_) | ureq::Error::ConnectionFailed => {
            TransportErrorKind::Connect
        }
        ureq::Error::Io(source) => match source.kind() {
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => {
                TransportErrorKind::Read
            }
            std::io::ErrorKind::NotFound => TransportErrorKind::Dns,
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::NotConnected
            | std::io::ErrorKind::AddrNotAvailable => TransportErrorKind::Connect,
            std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::UnexpectedEof => TransportErrorKind::Read,
            _ => TransportErrorKind::Other,
        },
        _ => TransportErrorKind::Other,
    }
}

fn wrapped_ureq_error(io_error: &std::io::Error) -> Option<&ureq::Error> {
    io_error
        .get_ref()
        .and_then(|source| source.downcast_ref::<ureq::Error>())
}

enum ReadBodyError {
    Read(std::io::Error),
    TooLarge { actual_bytes: usize },
}

fn read_all_body_limited(
    response: &mut ureq::http::Response<ureq::Body>,
    max_bytes: usize,
) -> std::result::Result<Bytes, ReadBodyError> {
    let mut reader = response.body_mut().as_reader();
    let mut collected = Vec::new();
    let mut chunk = [0_u8; 8192];
    let mut total_len = 0_usize;

    loop {
        let read = reader.read(&mut chunk).map_err(ReadBodyError::Read)?;
        if read == 0 {
            break;
        }
        total_len = total_len.saturating_add(read);
        if total_len > max_bytes {
            return Err(ReadBodyError::TooLarge {
                actual_bytes: total_len,
            });
        }
        collected.extend_from_slice(&chunk[..read]);
    }

    Ok(Bytes::from(collected))
}
