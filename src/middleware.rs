//! Onion-style composition of request handlers.
//!
//! A [`Middleware`] turns the next [`Handler`] into a new one, so it can act before, after or
//! instead of the inner layers. [`Chain::with`] composes links into a new chain without
//! touching the one it was called on.
//!
//! # Ordering
//!
//! Links passed to a single [`Chain::with`] call run in the order given: for `[a, b]` the
//! pre-logic of `a` runs first and its post-logic runs last. Links added by a *later* call wrap
//! everything composed so far, so `with([a])` followed by `with([b])` runs `b` outermost. The two
//! orders differ; when the relative order of links matters, register them in one call.
//!
//! ```
//! use std::sync::{Arc, Mutex};
//!
//! use httpflow::middleware::{Chain, Handler, from_fn};
//! use httpflow::{Request, Response};
//! use http::StatusCode;
//!
//! let trace = Arc::new(Mutex::new(Vec::new()));
//! let link = |name: &'static str| {
//!     let trace = Arc::clone(&trace);
//!     from_fn(move |request, next| {
//!         trace.lock().unwrap().push(name);
//!         next(request)
//!     })
//! };
//!
//! let chain = Chain::new().with([link("a")]).with([link("b")]);
//! let terminal: Handler = Arc::new(|_request: &mut Request| Ok(Response::empty(StatusCode::OK)));
//! let handler = chain.then(terminal);
//! handler(&mut Request::default()).unwrap();
//! assert_eq!(*trace.lock().unwrap(), ["b", "a"]);
//! ```

use std::fmt;
use std::sync::Arc;

use crate::Result;
pub use crate::debug::{debug, debug_to};
use crate::policy::{Interceptor, RequestContext};
use crate::request::Request;
use crate::response::Response;

pub type Handler = Arc<dyn Fn(&mut Request) -> Result<Response> + Send + Sync>;

pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// An immutable, shareable composition of middleware links.
#[derive(Clone)]
pub struct Chain {
    compose: Middleware,
    links: usize,
}

impl Chain {
    pub fn new() -> Self {
        Self {
            compose: Arc::new(|next: Handler| next),
            links: 0,
        }
    }

    /// A new chain with `links` wrapped around everything composed so far.
    pub fn with<I>(&self, links: I) -> Self
    where
        I: IntoIterator<Item = Middleware>,
    {
        let links: Vec<Middleware> = links.into_iter().collect();
        if links.is_empty() {
            return self.clone();
        }

        let added = links.len();
        let inner = Arc::clone(&self.compose);
        Self {
            compose: Arc::new(move |terminal: Handler| {
                let mut handler = inner(terminal);
                for link in links.iter().rev() {
                    handler = link(handler);
                }
                handler
            }),
            links: self.links + added,
        }
    }

    /// Wraps `terminal` with every link of this chain.
    pub fn then(&self, terminal: Handler) -> Handler {
        (self.compose)(terminal)
    }

    pub fn len(&self) -> usize {
        self.links
    }

    pub fn is_empty(&self) -> bool {
        self.links == 0
    }
}

impl Default for Chain {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Chain {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter
            .debug_struct("Chain")
            .field("links", &self.links)
            .finish()
    }
}

/// Builds a link from a function that receives the request and the next handler.
pub fn from_fn<F>(f: F) -> Middleware
where
    F: Fn(&mut Request, &Handler) -> Result<Response> + Send + Sync + 'static,
{
    let f = Arc::new(f);
    Arc::new(move |next: Handler| -> Handler {
        let f = Arc::clone(&f);
        Arc::new(move |request: &mut Request| f(request, &next))
    })
}

/// Runs the hooks of `interceptor` around the inner layers.
pub fn interceptor(interceptor: Arc<dyn Interceptor>) -> Middleware {
    Arc::new(move |next: Handler| -> Handler {
        let interceptor = Arc::clone(&interceptor);
        Arc::new(move |request: &mut Request| {
            let context = RequestContext::from_request(request);
            interceptor.on_request(&context, request.headers_mut());
            match next(request) {
                Ok(response) => {
                    interceptor.on_response(&context, response.status(), response.headers());
                    Ok(response)
                }
                Err(error) => {
                    interceptor.on_error(&context, &error);
                    Err(error)
                }
            }
        })
    })
}
