//! `httpflow` builds HTTP requests fluently and sends them through a composable middleware chain.
//!
//! # Quick Start
//!
//! ```no_run
//! use std::time::Duration;
//! use httpflow::prelude::{Client, debug};
//! use serde::Deserialize;
//!
//! #[derive(Debug, Default, Deserialize)]
//! struct Item {
//!     id: String,
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = Client::builder()
//!         .base_url("https://api.example.com")
//!         .timeout(Duration::from_secs(5))
//!         .middleware(debug(true))
//!         .build()?;
//!
//!     let mut item = Item::default();
//!     client
//!         .post("/v1/items")
//!         .query("dry_run", ["false"])
//!         .json(&serde_json::json!({ "name": "demo" }))
//!         .decode_result(&mut item)?;
//!
//!     println!("created id={}", item.id);
//!     Ok(())
//! }
//! ```
//!
//! # Deferred errors
//!
//! Builder methods never fail immediately. Invalid input is recorded and surfaced by the terminal
//! call, which then skips every middleware link and the dispatcher.

mod body;
mod client;
mod config;
mod context;
mod debug;
mod dispatch;
mod error;
pub mod middleware;
mod multipart;
mod policy;
mod request;
mod response;
mod tls;
mod transport;
mod util;

pub use crate::body::{Body, BodyEncoder, BodyReader, BodySource, ReadOnce};
pub use crate::client::{Client, ClientBuilder};
pub use crate::config::{CertificateFiles, TransportConfig};
pub use crate::context::{CancelHandle, Context};
pub use crate::dispatch::Dispatcher;
pub use crate::error::{BoxError, CancelReason, Error, ErrorCode, ErrorKind, TransportErrorKind};
pub use crate::middleware::{Chain, Handler, Middleware};
pub use crate::multipart::{Multipart, MultipartReader};
pub use crate::policy::{Interceptor, RedirectPolicy, RequestContext};
pub use crate::request::{Request, RequestBuilder};
pub use crate::response::{Response, ResponseView};
pub use crate::transport::UreqDispatcher;

pub type Result<T> = std::result::Result<T, Error>;

pub mod prelude {
    pub use crate::middleware::{debug, debug_to, from_fn, interceptor};
    pub use crate::{
        BodySource, CancelReason, Chain, Client, ClientBuilder, Context, Dispatcher, Error,
        ErrorCode, ErrorKind, Interceptor, Middleware, Multipart, ReadOnce, RedirectPolicy,
        Request, RequestBuilder, Response, ResponseView, Result,
    };
}
