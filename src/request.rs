use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use http::header::{ACCEPT, CONTENT_TYPE, HeaderValue};
use http::{HeaderMap, Method};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::{Url, form_urlencoded};

use crate::Result;
use crate::body::{Body, BodyEncoder, BodySource};
use crate::context::Context;
use crate::dispatch::Dispatcher;
use crate::error::{Error, ErrorList};
use crate::middleware::{Chain, Handler};
use crate::multipart::Multipart;
use crate::response::{Response, ResponseView, decode_json};
use crate::util::{parse_header_name, parse_header_value};

const ANY_MEDIA_TYPE: &str = "*/*";

/// A request under construction, as seen by middleware and dispatchers.
#[derive(Debug)]
pub struct Request {
    method: Method,
    url: Option<Url>,
    headers: HeaderMap,
    body: Option<Body>,
    context: Context,
}

impl Request {
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url: Some(url),
            ..Self::default()
        }
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    pub fn url_mut(&mut self) -> Option<&mut Url> {
        self.url.as_mut()
    }

    pub fn set_url(&mut self, url: Url) {
        self.url = Some(url);
    }

    /// The target URL as text, empty when none is set.
    pub fn uri_text(&self) -> String {
        self.url.as_ref().map(Url::to_string).unwrap_or_default()
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    pub fn body(&self) -> Option<&Body> {
        self.body.as_ref()
    }

    pub fn body_mut(&mut self) -> Option<&mut Body> {
        self.body.as_mut()
    }

    pub fn set_body(&mut self, body: Body) {
        self.body = Some(body);
    }

    pub fn take_body(&mut self) -> Option<Body> {
        self.body.take()
    }

    /// Whether the body, if any, can be produced again for retransmission.
    pub fn is_replayable(&self) -> bool {
        self.body.as_ref().is_none_or(Body::is_replayable)
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn set_context(&mut self, context: Context) {
        self.context = context;
    }
}

impl Default for Request {
    fn default() -> Self {
        Self {
            method: Method::GET,
            url: None,
            headers: HeaderMap::new(),
            body: None,
            context: Context::background(),
        }
    }
}

/// Fluent request builder with deferred errors.
///
/// Configuration methods never fail on the spot: a bad method, URL, header or body is recorded
/// and the builder carries on. The first recorded error is returned by the terminal call
/// ([`execute`](Self::execute), [`decode_result`](Self::decode_result), [`result`](Self::result),
/// [`response_view`](Self::response_view)) without running any middleware or dispatch.
pub struct RequestBuilder {
    request: Request,
    base_url: Option<Url>,
    chain: Chain,
    dispatcher: Arc<dyn Dispatcher>,
    errors: ErrorList,
}

impl RequestBuilder {
    pub fn new(dispatcher: Arc<dyn Dispatcher>) -> Self {
        Self {
            request: Request::default(),
            base_url: None,
            chain: Chain::new(),
            dispatcher,
            errors: ErrorList::default(),
        }
    }

    pub(crate) fn with_base(mut self, base_url: Option<Url>) -> Self {
        if let Some(base_url) = &base_url {
            self.request.set_url(base_url.clone());
        }
        self.base_url = base_url;
        self
    }

    /// Sets the URL that [`uri`](Self::uri) resolves against, and the initial target.
    pub fn base_url(mut self, base_url: &str) -> Self {
        match Url::parse(base_url) {
            Ok(url) => self.with_base(Some(url)),
            Err(source) => {
                self.errors.push(Error::InvalidUrl {
                    url: base_url.to_owned(),
                    source,
                });
                self
            }
        }
    }

    pub fn chain(mut self, chain: Chain) -> Self {
        self.chain = chain;
        self
    }

    pub fn method(mut self, method: impl AsRef<str>) -> Self {
        let method = method.as_ref();
        match Method::from_bytes(method.as_bytes()) {
            Ok(method) => self.request.set_method(method),
            Err(_) => self.errors.push(Error::InvalidMethod {
                method: method.to_owned(),
            }),
        }
        self
    }

    /// Resolves `path` against the base URL, or against the current target when there is no
    /// base.
    pub fn uri(mut self, path: &str) -> Self {
        let Some(base) = self.base_url.clone().or_else(|| self.request.url().cloned()) else {
            self.errors.push(Error::MissingUrl {
                target: path.to_owned(),
            });
            return self;
        };
        match base.join(path) {
            Ok(url) => self.request.set_url(url),
            Err(source) => self.errors.push(Error::InvalidUrl {
                url: path.to_owned(),
                source,
            }),
        }
        self
    }

    /// Replaces the target with an absolute URL.
    pub fn url(mut self, url: &str) -> Self {
        match Url::parse(url) {
            Ok(parsed) => self.request.set_url(parsed),
            Err(source) => self.errors.push(Error::InvalidUrl {
                url: url.to_owned(),
                source,
            }),
        }
        self
    }

    /// The first value replaces any previous value of `key`; the rest are appended.
    pub fn header<I, V>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: AsRef<str>,
    {
        let values: Vec<V> = values.into_iter().collect();
        if values.is_empty() {
            return self;
        }
        let name = match parse_header_name(key) {
            Ok(name) => name,
            Err(error) => {
                self.errors.push(error);
                return self;
            }
        };
        let parsed: Result<Vec<HeaderValue>> = values
            .iter()
            .map(|value| parse_header_value(name.as_str(), value.as_ref()))
            .collect();
        let parsed = match parsed {
            Ok(parsed) => parsed,
            Err(error) => {
                self.errors.push(error);
                return self;
            }
        };

        for (index, value) in parsed.into_iter().enumerate() {
            if index == 0 {
                self.request.headers_mut().insert(name.clone(), value);
            } else {
                self.request.headers_mut().append(name.clone(), value);
            }
        }
        self
    }

    /// Same replace-then-append rule as [`header`](Self::header), on the URL query. The query is
    /// re-encoded with keys sorted after every call.
    pub fn query<I, V>(mut self, key: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        if values.is_empty() {
            return self;
        }
        let Some(url) = self.request.url_mut() else {
            self.errors.push(Error::MissingUrl {
                target: format!("?{key}"),
            });
            return self;
        };

        let mut pairs: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in url.query_pairs() {
            pairs
                .entry(name.into_owned())
                .or_default()
                .push(value.into_owned());
        }
        pairs.insert(key.to_owned(), values);

        let encoded = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(
                pairs
                    .iter()
                    .flat_map(|(name, values)| values.iter().map(move |value| (name, value))),
            )
            .finish();
        url.set_query(Some(&encoded));
        self
    }

    /// Applies every field of `value` with [`query`](Self::query) semantics.
    pub fn bind_query<T>(mut self, value: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        let encoded = match serde_urlencoded::to_string(value) {
            Ok(encoded) => encoded,
            Err(source) => {
                self.errors.push(Error::SerializeQuery { source });
                return self;
            }
        };

        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for (name, value) in form_urlencoded::parse(encoded.as_bytes()) {
            match grouped.iter_mut().find(|(existing, _)| *existing == name) {
                Some((_, values)) => values.push(value.into_owned()),
                None => grouped.push((name.into_owned(), vec![value.into_owned()])),
            }
        }
        for (name, values) in grouped {
            self = self.query(&name, values);
        }
        self
    }

    /// Serializes `value` as a JSON body followed by a newline.
    pub fn json<T>(mut self, value: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        self = self
            .header(CONTENT_TYPE.as_str(), ["application/json"])
            .header(ACCEPT.as_str(), [ANY_MEDIA_TYPE]);
        match serde_json::to_vec(value) {
            Ok(mut buffer) => {
                buffer.push(b'\n');
                self.body(Cursor::new(buffer))
            }
            Err(source) => {
                self.errors.push(Error::SerializeJson { source });
                self
            }
        }
    }

    pub fn xml<T>(mut self, value: &T) -> Self
    where
        T: Serialize + ?Sized,
    {
        self = self.header(CONTENT_TYPE.as_str(), ["application/xml"]);
        match quick_xml::se::to_string(value) {
            Ok(document) => self.body(Cursor::new(document.into_bytes())),
            Err(source) => {
                self.errors.push(Error::SerializeXml {
                    source: Box::new(source),
                });
                self
            }
        }
    }

    pub fn body<S: BodySource>(mut self, source: S) -> Self {
        self.request.set_body(Body::from_source(source));
        self
    }

    pub fn encoded_body<E>(mut self, encoder: &E) -> Self
    where
        E: BodyEncoder + ?Sized,
    {
        match encoder.encode() {
            Ok(source) => self.body(source),
            Err(source) => {
                self.errors.push(Error::EncodeBody { source });
                self
            }
        }
    }

    /// Builds a `multipart/form-data` body. The form is closed once `build` returns.
    pub fn multipart<F>(mut self, build: F) -> Self
    where
        F: FnOnce(&mut Multipart),
    {
        let mut multipart = Multipart::new();
        build(&mut multipart);
        multipart.close();
        match multipart.finish() {
            Ok((reader, content_type)) => self
                .header(CONTENT_TYPE.as_str(), [content_type])
                .body(reader),
            Err(error) => {
                self.errors.push(error);
                self
            }
        }
    }

    pub fn with_context(mut self, context: Context) -> Self {
        self.request.set_context(context);
        self
    }

    pub fn err(&self) -> Option<&Error> {
        self.errors.first()
    }

    pub fn errors(&self) -> &[Error] {
        self.errors.as_slice()
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    /// Runs the request through the middleware chain and the dispatcher.
    pub fn execute(self) -> Result<Response> {
        let Self {
            mut request,
            chain,
            dispatcher,
            errors,
            ..
        } = self;
        if let Some(error) = errors.into_first() {
            return Err(error);
        }

        if !request.headers().contains_key(ACCEPT) {
            request
                .headers_mut()
                .insert(ACCEPT, HeaderValue::from_static(ANY_MEDIA_TYPE));
        }
        let terminal: Handler = Arc::new(move |request: &mut Request| dispatcher.send(request));
        let handler = chain.then(terminal);
        handler(&mut request).map_err(|source| Error::RequestFailed {
            source: Box::new(source),
        })
    }

    /// Executes the request and decodes its JSON body into `target`.
    ///
    /// Bodies whose top-level value is an array are rejected with
    /// [`Error::ArrayRootedBody`]; use [`execute`](Self::execute) and decode them directly.
    pub fn decode_result<T>(self, target: &mut T) -> Result<()>
    where
        T: DeserializeOwned,
    {
        *target = self.result()?;
        Ok(())
    }

    pub fn result<T>(self) -> Result<T>
    where
        T: DeserializeOwned,
    {
        let mut response = self.execute()?;
        let body = response.bytes()?;
        decode_json(&body)
    }

    pub fn response_view(self) -> Result<ResponseView> {
        self.execute().map(ResponseView::new)
    }
}
