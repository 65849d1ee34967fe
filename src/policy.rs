use http::{HeaderMap, Method, StatusCode};

use crate::error::Error;
use crate::request::Request;
use crate::util::redact_uri_for_logs;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RedirectPolicy {
    enabled: bool,
    max_redirects: usize,
}

impl RedirectPolicy {
    pub const fn none() -> Self {
        Self {
            enabled: false,
            max_redirects: 0,
        }
    }

    pub const fn limited(max_redirects: usize) -> Self {
        Self {
            enabled: true,
            max_redirects,
        }
    }

    pub const fn follow() -> Self {
        Self::limited(10)
    }

    pub const fn enabled(self) -> bool {
        self.enabled
    }

    pub const fn max_redirects(self) -> usize {
        if self.enabled { self.max_redirects } else { 0 }
    }
}

impl Default for RedirectPolicy {
    fn default() -> Self {
        Self::follow()
    }
}

/// What an [`Interceptor`] sees of the exchange it observes.
#[derive(Clone, Debug)]
pub struct RequestContext {
    method: Method,
    uri: String,
}

impl RequestContext {
    pub(crate) fn from_request(request: &Request) -> Self {
        Self {
            method: request.method().clone(),
            uri: redact_uri_for_logs(&request.uri_text()),
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    /// The target URL with credentials, query and fragment stripped.
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

/// Observation hooks, turned into a chain link by [`interceptor`](crate::middleware::interceptor).
pub trait Interceptor: Send + Sync {
    fn on_request(&self, _context: &RequestContext, _headers: &mut HeaderMap) {}

    fn on_response(&self, _context: &RequestContext, _status: StatusCode, _headers: &HeaderMap) {}

    fn on_error(&self, _context: &RequestContext, _error: &Error) {}
}
