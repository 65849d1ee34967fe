//! Blocking transport over `ureq`.

use std::time::Duration;

use crate::Result;
use crate::config::TransportConfig;
use crate::dispatch::Dispatcher;
use crate::request::Request;
use crate::response::Response;

mod agent;
mod execute;

const CANCEL_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// The production [`Dispatcher`]: one pooled `ureq` agent plus the exchange policy of a
/// [`TransportConfig`].
///
/// Redirects are followed here rather than inside `ureq`, so that body replay and header
/// sanitizing follow the rules of this crate. Requests carrying a cancellable
/// [`Context`](crate::Context) run on a helper thread and are abandoned as soon as the context is
/// done.
///
/// An abandoned helper thread keeps its connection until the underlying `ureq` call returns. That
/// call is bounded by the remaining [`TransportConfig::timeout`], capped by the context deadline
/// when one is set, so a context cancelled without a deadline may leave the socket open for up to
/// the full configured timeout.
#[derive(Clone)]
pub struct UreqDispatcher {
    agent: ureq::Agent,
    config: TransportConfig,
}

impl UreqDispatcher {
    pub fn new(config: TransportConfig) -> Result<Self> {
        let config = config.normalized();
        let agent = agent::make_agent(&config)?;
        Ok(Self { agent, config })
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }
}

impl std::fmt::Debug for UreqDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("UreqDispatcher")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Dispatcher for UreqDispatcher {
    fn send(&self, request: &mut Request) -> Result<Response> {
        self.execute(request)
    }
}
