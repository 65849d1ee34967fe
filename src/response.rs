use std::fmt;
use std::io::{Cursor, Read};

use bytes::Bytes;
use http::{HeaderMap, StatusCode, Version};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use url::Url;

use crate::Result;
use crate::body::BodyReader;
use crate::error::Error;
use crate::util::truncate_body;

/// A completed exchange. The body can be read once.
pub struct Response {
    status: StatusCode,
    version: Version,
    headers: HeaderMap,
    url: Option<Url>,
    body: Option<BodyReader>,
}

impl Response {
    pub fn new<R>(status: StatusCode, headers: HeaderMap, body: R) -> Self
    where
        R: Read + Send + Sync + 'static,
    {
        Self {
            status,
            version: Version::HTTP_11,
            headers,
            url: None,
            body: Some(Box::new(body)),
        }
    }

    pub fn from_bytes(status: StatusCode, headers: HeaderMap, body: impl Into<Bytes>) -> Self {
        Self::new(status, headers, Cursor::new(body.into()))
    }

    /// A response with no headers and an empty body.
    pub fn empty(status: StatusCode) -> Self {
        Self::new(status, HeaderMap::new(), std::io::empty())
    }

    pub fn with_version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url = Some(url);
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    /// The URL the response was finally served from, after redirects.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn take_body(&mut self) -> Option<BodyReader> {
        self.body.take()
    }

    pub fn set_body<R>(&mut self, body: R)
    where
        R: Read + Send + Sync + 'static,
    {
        self.body = Some(Box::new(body));
    }

    pub fn is_consumed(&self) -> bool {
        self.body.is_none()
    }

    /// Reads the remaining body. Fails with [`Error::BodyConsumed`] on a second call.
    pub fn bytes(&mut self) -> Result<Bytes> {
        let mut reader = self.body.take().ok_or(Error::BodyConsumed)?;
        let mut content = Vec::new();
        reader
            .read_to_end(&mut content)
            .map_err(|source| Error::ReadResponseBody { source })?;
        Ok(Bytes::from(content))
    }

    pub fn text_lossy(&mut self) -> Result<String> {
        let body = self.bytes()?;
        Ok(String::from_utf8_lossy(&body).into_owned())
    }

    pub fn json<T>(&mut self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let body = self.bytes()?;
        decode_json(&body)
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("headers", &self.headers)
            .field("url", &self.url.as_ref().map(Url::as_str))
            .field("consumed", &self.body.is_none())
            .finish()
    }
}

/// Decodes the first JSON value of `body`, rejecting array-rooted documents.
pub(crate) fn decode_json<T>(body: &[u8]) -> Result<T>
where
    T: DeserializeOwned,
{
    if body.iter().find(|byte| !byte.is_ascii_whitespace()) == Some(&b'[') {
        return Err(Error::ArrayRootedBody {
            body: truncate_body(body),
        });
    }

    let mut values = serde_json::Deserializer::from_slice(body).into_iter::<T>();
    let decoded = match values.next() {
        Some(decoded) => decoded,
        None => serde_json::from_slice(body),
    };
    decoded.map_err(|source| Error::Deserialize {
        source,
        body: truncate_body(body),
    })
}

/// Read-once helpers over a [`Response`].
#[derive(Debug)]
pub struct ResponseView {
    response: Response,
}

impl ResponseView {
    pub fn new(response: Response) -> Self {
        Self { response }
    }

    pub fn status_code(&self) -> StatusCode {
        self.response.status()
    }

    /// First value of `name`, or `None` when absent or not visible ASCII.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        self.response.headers()
    }

    /// The raw body stream. Any later read through this view fails with
    /// [`Error::BodyConsumed`].
    pub fn body(&mut self) -> Option<BodyReader> {
        self.response.take_body()
    }

    pub fn body_bytes(&mut self) -> Result<Bytes> {
        self.response.bytes()
    }

    pub fn body_json_map(&mut self) -> Result<Map<String, Value>> {
        self.response.json()
    }

    pub fn into_response(self) -> Response {
        self.response
    }
}
