use http::Method;
use thiserror::Error;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum TransportErrorKind {
    Dns,
    Connect,
    Tls,
    Read,
    Other,
}

impl std::fmt::Display for TransportErrorKind {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Dns => "dns",
            Self::Connect => "connect",
            Self::Tls => "tls",
            Self::Read => "read",
            Self::Other => "other",
        };
        formatter.write_str(text)
    }
}

/// Why a [`Context`](crate::Context) stopped an exchange.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CancelReason {
    Cancelled,
    DeadlineExceeded,
}

impl std::fmt::Display for CancelReason {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::Cancelled => "context canceled",
            Self::DeadlineExceeded => "context deadline exceeded",
        };
        formatter.write_str(text)
    }
}

/// Coarse error taxonomy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad URL, missing base URL, invalid header or transport settings.
    Config,
    /// JSON, XML, query or custom body encoding failed.
    Encode,
    /// Multipart assembly failed.
    Multipart,
    /// The exchange itself failed, including cancellation.
    Dispatch,
    /// The response body could not be read or decoded into the requested shape.
    Decode,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ErrorCode {
    InvalidUrl,
    MissingUrl,
    InvalidMethod,
    InvalidHeaderName,
    InvalidHeaderValue,
    InvalidProxy,
    TlsConfig,
    SerializeJson,
    SerializeXml,
    SerializeQuery,
    EncodeBody,
    MultipartFile,
    MultipartClosed,
    MultipartNotClosed,
    InvalidBoundary,
    LateBoundary,
    Transport,
    Timeout,
    Cancelled,
    DeadlineExceeded,
    RequestBuild,
    ReadBody,
    ResponseBodyTooLarge,
    RedirectLimitExceeded,
    MissingRedirectLocation,
    InvalidRedirectLocation,
    RedirectBodyNotReplayable,
    BodyNotReplayable,
    Middleware,
    Deserialize,
    ArrayRootedBody,
    BodyConsumed,
    ReadResponseBody,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::InvalidUrl => "invalid_url",
            Self::MissingUrl => "missing_url",
            Self::InvalidMethod => "invalid_method",
            Self::InvalidHeaderName => "invalid_header_name",
            Self::InvalidHeaderValue => "invalid_header_value",
            Self::InvalidProxy => "invalid_proxy",
            Self::TlsConfig => "tls_config",
            Self::SerializeJson => "serialize_json",
            Self::SerializeXml => "serialize_xml",
            Self::SerializeQuery => "serialize_query",
            Self::EncodeBody => "encode_body",
            Self::MultipartFile => "multipart_file",
            Self::MultipartClosed => "multipart_closed",
            Self::MultipartNotClosed => "multipart_not_closed",
            Self::InvalidBoundary => "invalid_boundary",
            Self::LateBoundary => "late_boundary",
            Self::Transport => "transport",
            Self::Timeout => "timeout",
            Self::Cancelled => "cancelled",
            Self::DeadlineExceeded => "deadline_exceeded",
            Self::RequestBuild => "request_build",
            Self::ReadBody => "read_body",
            Self::ResponseBodyTooLarge => "response_body_too_large",
            Self::RedirectLimitExceeded => "redirect_limit_exceeded",
            Self::MissingRedirectLocation => "missing_redirect_location",
            Self::InvalidRedirectLocation => "invalid_redirect_location",
            Self::RedirectBodyNotReplayable => "redirect_body_not_replayable",
            Self::BodyNotReplayable => "body_not_replayable",
            Self::Middleware => "middleware",
            Self::Deserialize => "deserialize",
            Self::ArrayRootedBody => "array_rooted_body",
            Self::BodyConsumed => "body_consumed",
            Self::ReadResponseBody => "read_response_body",
        }
    }

    pub const fn kind(self) -> ErrorKind {
        match self {
            Self::InvalidUrl
            | Self::MissingUrl
            | Self::InvalidMethod
            | Self::InvalidHeaderName
            | Self::InvalidHeaderValue
            | Self::InvalidProxy
            | Self::TlsConfig => ErrorKind::Config,
            Self::SerializeJson | Self::SerializeXml | Self::SerializeQuery | Self::EncodeBody => {
                ErrorKind::Encode
            }
            Self::MultipartFile
            | Self::MultipartClosed
            | Self::MultipartNotClosed
            | Self::InvalidBoundary
            | Self::LateBoundary => ErrorKind::Multipart,
            Self::Transport
            | Self::Timeout
            | Self::Cancelled
            | Self::DeadlineExceeded
            | Self::RequestBuild
            | Self::ReadBody
            | Self::ResponseBodyTooLarge
            | Self::RedirectLimitExceeded
            | Self::MissingRedirectLocation
            | Self::InvalidRedirectLocation
            | Self::RedirectBodyNotReplayable
            | Self::BodyNotReplayable
            | Self::Middleware => ErrorKind::Dispatch,
            Self::Deserialize
            | Self::ArrayRootedBody
            | Self::BodyConsumed
            | Self::ReadResponseBody => ErrorKind::Decode,
        }
    }
}

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    #[error("invalid url {url}: {source}")]
    InvalidUrl {
        url: String,
        #[source]
        source: url::ParseError,
    },
    #[error("invalid request url: no base url to resolve {target}")]
    MissingUrl { target: String },
    #[error("invalid http method {method}")]
    InvalidMethod { method: String },
    #[error("invalid header name {name}: {source}")]
    InvalidHeaderName {
        name: String,
        #[source]
        source: http::header::InvalidHeaderName,
    },
    #[error("invalid header value for {name}: {source}")]
    InvalidHeaderValue {
        name: String,
        #[source]
        source: http::header::InvalidHeaderValue,
    },
    #[error("failed to parse proxy url {url}")]
    InvalidProxy { url: String },
    #[error("invalid tls configuration: {message}")]
    TlsConfig { message: String },
    #[error("json body encode failed: {source}")]
    SerializeJson {
        #[source]
        source: serde_json::Error,
    },
    #[error("xml body encode failed: {source}")]
    SerializeXml {
        #[source]
        source: BoxError,
    },
    #[error("failed to serialize request query: {source}")]
    SerializeQuery {
        #[source]
        source: serde_urlencoded::ser::Error,
    },
    #[error("body encode failed: {source}")]
    EncodeBody {
        #[source]
        source: BoxError,
    },
    #[error("failed to open multipart file {path}: {source}")]
    MultipartFile {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("multipart body is already closed")]
    MultipartClosed,
    #[error("multipart body is not closed yet")]
    MultipartNotClosed,
    #[error("invalid multipart boundary {boundary:?}")]
    InvalidBoundary { boundary: String },
    #[error("multipart boundary must be set before any part is added")]
    LateBoundary,
    #[error("http transport error ({kind}) for {method} {uri}: {source}")]
    Transport {
        kind: TransportErrorKind,
        method: Method,
        uri: String,
        #[source]
        source: BoxError,
    },
    #[error("http request timed out after {timeout_ms}ms for {method} {uri}")]
    Timeout {
        timeout_ms: u128,
        method: Method,
        uri: String,
    },
    #[error("{reason} for {method} {uri}")]
    Cancelled {
        reason: CancelReason,
        method: Method,
        uri: String,
    },
    #[error("failed to build http request: {source}")]
    RequestBuild {
        #[source]
        source: http::Error,
    },
    #[error("failed to read request body: {source}")]
    ReadBody {
        #[source]
        source: std::io::Error,
    },
    #[error(
        "response body too large ({actual_bytes} bytes > {limit_bytes} bytes) for {method} {uri}"
    )]
    ResponseBodyTooLarge {
        limit_bytes: usize,
        actual_bytes: usize,
        method: Method,
        uri: String,
    },
    #[error("redirect limit exceeded ({max_redirects}) for {method} {uri}")]
    RedirectLimitExceeded {
        max_redirects: usize,
        method: Method,
        uri: String,
    },
    #[error("redirect response {status} missing location header for {method} {uri}")]
    MissingRedirectLocation {
        status: u16,
        method: Method,
        uri: String,
    },
    #[error("invalid redirect location {location} for {method} {uri}")]
    InvalidRedirectLocation {
        location: String,
        method: Method,
        uri: String,
    },
    #[error("cannot follow redirect for non-replayable request body: {method} {uri}")]
    RedirectBodyNotReplayable { method: Method, uri: String },
    #[error("request body cannot be replayed")]
    BodyNotReplayable,
    #[error("middleware error: {source}")]
    Middleware {
        #[source]
        source: BoxError,
    },
    #[error("request failed: {source}")]
    RequestFailed {
        #[source]
        source: Box<Error>,
    },
    #[error("decode response failed: {source}; body={body}")]
    Deserialize {
        #[source]
        source: serde_json::Error,
        body: String,
    },
    #[error("decode response failed: array-rooted json bodies are not supported; body={body}")]
    ArrayRootedBody { body: String },
    #[error("response body was already consumed")]
    BodyConsumed,
    #[error("read body failed: {source}")]
    ReadResponseBody {
        #[source]
        source: std::io::Error,
    },
}

impl Error {
    /// Wraps an arbitrary failure raised by a middleware link.
    pub fn middleware(source: impl Into<BoxError>) -> Self {
        Self::Middleware {
            source: source.into(),
        }
    }

    /// The code of the underlying failure, looking through `RequestFailed`.
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidUrl { .. } => ErrorCode::InvalidUrl,
            Self::MissingUrl { .. } => ErrorCode::MissingUrl,
            Self::InvalidMethod { .. } => ErrorCode::InvalidMethod,
            Self::InvalidHeaderName { .. } => ErrorCode::InvalidHeaderName,
            Self::InvalidHeaderValue { .. } => ErrorCode::InvalidHeaderValue,
            Self::InvalidProxy { .. } => ErrorCode::InvalidProxy,
            Self::TlsConfig { .. } => ErrorCode::TlsConfig,
            Self::SerializeJson { .. } => ErrorCode::SerializeJson,
            Self::SerializeXml { .. } => ErrorCode::SerializeXml,
            Self::SerializeQuery { .. } => ErrorCode::SerializeQuery,
            Self::EncodeBody { .. } => ErrorCode::EncodeBody,
            Self::MultipartFile { .. } => ErrorCode::MultipartFile,
            Self::MultipartClosed => ErrorCode::MultipartClosed,
            Self::MultipartNotClosed => ErrorCode::MultipartNotClosed,
            Self::InvalidBoundary { .. } => ErrorCode::InvalidBoundary,
            Self::LateBoundary => ErrorCode::LateBoundary,
            Self::Transport { .. } => ErrorCode::Transport,
            Self::Timeout { .. } => ErrorCode::Timeout,
            Self::Cancelled {
                reason: CancelReason::Cancelled,
                ..
            } => ErrorCode::Cancelled,
            Self::Cancelled {
                reason: CancelReason::DeadlineExceeded,
                ..
            } => ErrorCode::DeadlineExceeded,
            Self::RequestBuild { .. } => ErrorCode::RequestBuild,
            Self::ReadBody { .. } => ErrorCode::ReadBody,
            Self::ResponseBodyTooLarge { .. } => ErrorCode::ResponseBodyTooLarge,
            Self::RedirectLimitExceeded { .. } => ErrorCode::RedirectLimitExceeded,
            Self::MissingRedirectLocation { .. } => ErrorCode::MissingRedirectLocation,
            Self::InvalidRedirectLocation { .. } => ErrorCode::InvalidRedirectLocation,
            Self::RedirectBodyNotReplayable { .. } => ErrorCode::RedirectBodyNotReplayable,
            Self::BodyNotReplayable => ErrorCode::BodyNotReplayable,
            Self::Middleware { .. } => ErrorCode::Middleware,
            Self::RequestFailed { source } => source.code(),
            Self::Deserialize { .. } => ErrorCode::Deserialize,
            Self::ArrayRootedBody { .. } => ErrorCode::ArrayRootedBody,
            Self::BodyConsumed => ErrorCode::BodyConsumed,
            Self::ReadResponseBody { .. } => ErrorCode::ReadResponseBody,
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.code().kind()
    }

    /// The cancellation reason when the exchange was stopped by its context.
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled { reason, .. } => Some(*reason),
            Self::RequestFailed { source } => source.cancel_reason(),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_reason().is_some()
    }
}

/// Errors collected across a fluent chain. Only the first one is surfaced by terminal calls.
#[derive(Debug, Default)]
pub(crate) struct ErrorList {
    errors: Vec<Error>,
}

impl ErrorList {
    pub(crate) fn push(&mut self, error: Error) {
        self.errors.push(error);
    }

    pub(crate) fn first(&self) -> Option<&Error> {
        self.errors.first()
    }

    pub(crate) fn as_slice(&self) -> &[Error] {
        &self.errors
    }

    pub(crate) fn into_first(self) -> Option<Error> {
        self.errors.into_iter().next()
    }
}
