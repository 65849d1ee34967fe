use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use http::Method;
use url::Url;

use crate::Result;
use crate::config::{CertificateFiles, TransportConfig};
use crate::dispatch::Dispatcher;
use crate::error::Error;
use crate::middleware::{Chain, Middleware};
use crate::policy::RedirectPolicy;
use crate::request::RequestBuilder;
use crate::transport::UreqDispatcher;

/// Shared configuration root: base URL, dispatcher and middleware chain.
///
/// Cloning is cheap; every clone shares the same dispatcher and chain.
#[derive(Clone)]
pub struct Client {
    base_url: Option<Url>,
    dispatcher: Arc<dyn Dispatcher>,
    chain: Chain,
    transport_config: TransportConfig,
}

impl Client {
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// A client with the default transport and no base URL.
    pub fn new() -> Result<Self> {
        ClientBuilder::new().build()
    }

    /// A fresh builder bound to this client's base URL, chain and dispatcher.
    pub fn request(&self) -> RequestBuilder {
        RequestBuilder::new(Arc::clone(&self.dispatcher))
            .with_base(self.base_url.clone())
            .chain(self.chain.clone())
    }

    pub fn get(&self, path: &str) -> RequestBuilder {
        self.method_request(Method::GET, path)
    }

    pub fn post(&self, path: &str) -> RequestBuilder {
        self.method_request(Method::POST, path)
    }

    pub fn put(&self, path: &str) -> RequestBuilder {
        self.method_request(Method::PUT, path)
    }

    pub fn patch(&self, path: &str) -> RequestBuilder {
        self.method_request(Method::PATCH, path)
    }

    pub fn delete(&self, path: &str) -> RequestBuilder {
        self.method_request(Method::DELETE, path)
    }

    fn method_request(&self, method: Method, path: &str) -> RequestBuilder {
        let builder = self.request().method(method);
        if self.base_url.is_some() {
            builder.uri(path)
        } else {
            builder.url(path)
        }
    }

    /// Wraps `links` around the current chain. See [`Chain::with`] for the ordering rules.
    pub fn with_middleware<I>(&mut self, links: I)
    where
        I: IntoIterator<Item = Middleware>,
    {
        self.chain = self.chain.with(links);
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn dispatcher(&self) -> &Arc<dyn Dispatcher> {
        &self.dispatcher
    }

    pub fn set_dispatcher(&mut self, dispatcher: Arc<dyn Dispatcher>) {
        self.dispatcher = dispatcher;
    }

    pub fn transport_config(&self) -> &TransportConfig {
        &self.transport_config
    }

    /// Rebuilds the ureq transport from `config`, replacing the current dispatcher.
    pub fn set_transport_config(&mut self, config: TransportConfig) -> Result<()> {
        let dispatcher = UreqDispatcher::new(config)?;
        self.transport_config = dispatcher.config().clone();
        self.dispatcher = Arc::new(dispatcher);
        Ok(())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("Client")
            .field("base_url", &self.base_url.as_ref().map(Url::as_str))
            .field("chain", &self.chain)
            .field("transport_config", &self.transport_config)
            .finish_non_exhaustive()
    }
}

pub struct ClientBuilder {
    base_url: Option<String>,
    transport_config: TransportConfig,
    links: Vec<Middleware>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl ClientBuilder {
    pub(crate) fn new() -> Self {
        Self {
            base_url: None,
            transport_config: TransportConfig::default(),
            links: Vec::new(),
            dispatcher: None,
        }
    }

    pub fn base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = Some(base_url.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.transport_config.timeout = timeout.max(Duration::from_millis(1));
        self
    }

    pub fn connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.transport_config.connect_timeout = connect_timeout.max(Duration::from_millis(1));
        self
    }

    pub fn client_identity_pem_files(
        mut self,
        cert_file: impl Into<PathBuf>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        self.transport_config.client_identity = Some(CertificateFiles {
            cert_file: cert_file.into(),
            key_file: key_file.into(),
        });
        self
    }

    pub fn proxy(mut self, proxy_url: impl Into<String>) -> Self {
        self.transport_config.proxy = Some(proxy_url.into());
        self
    }

    pub fn redirect_policy(mut self, redirect_policy: RedirectPolicy) -> Self {
        self.transport_config.redirect_policy = redirect_policy;
        self
    }

    pub fn max_response_body_bytes(mut self, max_response_body_bytes: usize) -> Self {
        self.transport_config.max_response_body_bytes = max_response_body_bytes.max(1);
        self
    }

    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.transport_config.user_agent = user_agent.into();
        self
    }

    pub fn transport_config(mut self, transport_config: TransportConfig) -> Self {
        self.transport_config = transport_config;
        self
    }

    /// Links registered here are composed in a single [`Chain::with`] call at build time.
    pub fn middleware(mut self, link: Middleware) -> Self {
        self.links.push(link);
        self
    }

    /// Sends requests through `dispatcher` instead of the ureq transport.
    pub fn dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<Client> {
        let base_url = match self.base_url {
            Some(base_url) => Some(Url::parse(&base_url).map_err(|source| Error::InvalidUrl {
                url: base_url.clone(),
                source,
            })?),
            None => None,
        };

        let (dispatcher, transport_config): (Arc<dyn Dispatcher>, TransportConfig) =
            match self.dispatcher {
                Some(dispatcher) => (dispatcher, self.transport_config.normalized()),
                None => {
                    let dispatcher = UreqDispatcher::new(self.transport_config)?;
                    let transport_config = dispatcher.config().clone();
                    (Arc::new(dispatcher), transport_config)
                }
            };

        Ok(Client {
            base_url,
            dispatcher,
            chain: Chain::new().with(self.links),
            transport_config,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
