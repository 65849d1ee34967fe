use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use http::header::{CONTENT_LENGTH, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use tracing::{Span, debug, info_span, warn};
use url::Url;

use crate::Result;
use crate::body::BodyReader;
use crate::context::Context;
use crate::error::{CancelReason, Error, TransportErrorKind};
use crate::request::Request;
use crate::response::Response;
use crate::util::{
    is_redirect_status, redact_uri_for_logs, redirect_location, redirect_method,
    remaining_timeout, same_origin, sanitize_headers_for_redirect,
};

use super::agent::{Attempt, Exchange, run_attempt};
use super::{CANCEL_POLL_INTERVAL, UreqDispatcher};

impl UreqDispatcher {
    pub(super) fn execute(&self, request: &mut Request) -> Result<Response> {
        let method = request.method().clone();
        let url = request.url().cloned().ok_or_else(|| Error::MissingUrl {
            target: String::new(),
        })?;
        let redacted_uri = redact_uri_for_logs(url.as_str());
        let span = info_span!("httpflow.request", method = %method, uri = %redacted_uri);
        let _entered = span.enter();

        let context = request.context().clone();
        let request_started_at = Instant::now();
        let redirect_policy = self.config.redirect_policy;
        let mut redirect_count = 0_usize;
        let mut current_method = method;
        let mut current_url = url;
        let mut current_redacted_uri = redacted_uri;
        let mut current_headers = request.headers().clone();
        let mut send_body = true;
        let mut first_attempt = true;

        loop {
            if let Some(reason) = context.err() {
                return Err(Error::Cancelled {
                    reason,
                    method: current_method,
                    uri: current_redacted_uri,
                });
            }
            let remaining = self
                .config
                .timeout
                .saturating_sub(request_started_at.elapsed());
            if remaining.is_zero() {
                return Err(Error::Timeout {
                    timeout_ms: self.config.timeout.as_millis(),
                    method: current_method,
                    uri: current_redacted_uri,
                });
            }
            let Some(attempt_timeout) = remaining_timeout(remaining, context.deadline()) else {
                return Err(cancelled_error(&context, current_method, current_redacted_uri));
            };

            let mut attempt_headers = current_headers.clone();
            let body = if send_body {
                outgoing_body(request, first_attempt, &mut attempt_headers)?
            } else {
                None
            };
            first_attempt = false;

            debug!(method = %current_method, uri = %current_redacted_uri, "sending request");
            let attempt = Attempt {
                method: current_method.clone(),
                uri: current_url.to_string(),
                redacted_uri: current_redacted_uri.clone(),
                headers: attempt_headers,
                body,
                timeout: attempt_timeout,
                connect_timeout: self.config.connect_timeout,
                max_response_body_bytes: self.config.max_response_body_bytes,
            };
            let exchange = match self.dispatch(attempt, &context) {
                Ok(exchange) => exchange,
                Err(Error::Timeout { .. }) if context.is_done() => {
                    return Err(cancelled_error(&context, current_method, current_redacted_uri));
                }
                Err(error) => return Err(error),
            };

            let status = exchange.status;
            if redirect_policy.enabled() && is_redirect_status(status) {
                if redirect_count >= redirect_policy.max_redirects() {
                    return Err(Error::RedirectLimitExceeded {
                        max_redirects: redirect_policy.max_redirects(),
                        method: current_method,
                        uri: current_redacted_uri,
                    });
                }
                let Some(location) = redirect_location(&exchange.headers) else {
                    return Err(Error::MissingRedirectLocation {
                        status: status.as_u16(),
                        method: current_method,
                        uri: current_redacted_uri,
                    });
                };
                let Ok(next_url) = current_url.join(&location) else {
                    return Err(Error::InvalidRedirectLocation {
                        location,
                        method: current_method,
                        uri: current_redacted_uri,
                    });
                };

                let next_method = redirect_method(&current_method, status);
                let drops_body = drops_body(&current_method, &next_method, status);
                if !drops_body && send_body && !request.is_replayable() {
                    return Err(Error::RedirectBodyNotReplayable {
                        method: current_method,
                        uri: current_redacted_uri,
                    });
                }
                sanitize_headers_for_redirect(
                    &mut current_headers,
                    drops_body,
                    same_origin(&current_url, &next_url),
                );
                if drops_body {
                    send_body = false;
                }

                let next_redacted_uri = redact_uri_for_logs(next_url.as_str());
                debug!(
                    status = status.as_u16(),
                    location = %next_redacted_uri,
                    "following redirect"
                );
                current_method = next_method;
                current_url = next_url;
                current_redacted_uri = next_redacted_uri;
                redirect_count += 1;
                continue;
            }

            debug!(
                status = status.as_u16(),
                elapsed_ms = request_started_at.elapsed().as_millis() as u64,
                "request completed"
            );
            return Ok(into_response(exchange, current_url));
        }
    }

    /// Runs one attempt inline, or on a helper thread when the context can be cancelled.
    fn dispatch(&self, attempt: Attempt, context: &Context) -> Result<Exchange> {
        if context.is_background() {
            return run_attempt(&self.agent, attempt);
        }

        let method = attempt.method.clone();
        let uri = attempt.redacted_uri.clone();
        let agent = self.agent.clone();
        let span = Span::current();
        let (sender, receiver) = mpsc::channel();
        thread::Builder::new()
            .name("httpflow-dispatch".to_owned())
            .spawn(move || {
                let _entered = span.enter();
                let _ = sender.send(run_attempt(&agent, attempt));
            })
            .map_err(|source| Error::Transport {
                kind: TransportErrorKind::Other,
                method: method.clone(),
                uri: uri.clone(),
                source: Box::new(source),
            })?;

        loop {
            match receiver.recv_timeout(CANCEL_POLL_INTERVAL) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Timeout) => {
                    if let Some(reason) = context.err() {
                        warn!(%reason, "abandoning in-flight request");
                        return Err(Error::Cancelled {
                            reason,
                            method,
                            uri,
                        });
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(Error::Transport {
                        kind: TransportErrorKind::Other,
                        method,
                        uri,
                        source: "dispatch thread exited without a result".into(),
                    });
                }
            }
        }
    }
}

/// The reader to send for this attempt. The first attempt uses the body's own reader; later
/// attempts need a replay.
fn outgoing_body(
    request: &mut Request,
    first_attempt: bool,
    headers: &mut HeaderMap,
) -> Result<Option<BodyReader>> {
    let Some(body) = request.body_mut() else {
        return Ok(None);
    };
    if body.is_empty() {
        return Ok(None);
    }

    let reader = if first_attempt {
        match body.take_reader() {
            Some(reader) => reader,
            None => body.replay().ok_or(Error::BodyNotReplayable)?,
        }
    } else {
        body.replay().ok_or(Error::BodyNotReplayable)?
    };
    if let Some(length) = body.content_length()
        && !headers.contains_key(CONTENT_LENGTH)
    {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(length));
    }
    Ok(Some(reader))
}

fn drops_body(method: &Method, next_method: &Method, status: StatusCode) -> bool {
    status == StatusCode::SEE_OTHER || (*next_method == Method::GET && *method != Method::GET)
}

fn cancelled_error(context: &Context, method: Method, uri: String) -> Error {
    let reason = context
        .err()
        .unwrap_or(CancelReason::DeadlineExceeded);
    Error::Cancelled {
        reason,
        method,
        uri,
    }
}

fn into_response(exchange: Exchange, url: Url) -> Response {
    Response::from_bytes(exchange.status, exchange.headers, exchange.body)
        .with_version(exchange.version)
        .with_url(url)
}
