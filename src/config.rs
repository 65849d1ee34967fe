use std::path::PathBuf;
use std::time::Duration;

use crate::policy::RedirectPolicy;

pub(crate) const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
pub(crate) const DEFAULT_MAX_RESPONSE_BODY_BYTES: usize = 8 * 1024 * 1024;
pub(crate) const DEFAULT_USER_AGENT: &str = concat!("httpflow/", env!("CARGO_PKG_VERSION"));

/// PEM files holding the client certificate chain and its private key, for mutual TLS.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CertificateFiles {
    pub cert_file: PathBuf,
    pub key_file: PathBuf,
}

/// Settings of the ureq-backed transport.
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Budget for the whole exchange, redirects included.
    pub timeout: Duration,
    pub connect_timeout: Duration,
    pub client_identity: Option<CertificateFiles>,
    pub proxy: Option<String>,
    pub redirect_policy: RedirectPolicy,
    /// Larger response bodies fail with `ResponseBodyTooLarge`.
    pub max_response_body_bytes: usize,
    pub user_agent: String,
}

impl TransportConfig {
    /// Replaces zero values with their defaults.
    pub(crate) fn normalized(mut self) -> Self {
        if self.timeout.is_zero() {
            self.timeout = DEFAULT_TIMEOUT;
        }
        if self.connect_timeout.is_zero() {
            self.connect_timeout = DEFAULT_CONNECT_TIMEOUT;
        }
        self.max_response_body_bytes = self.max_response_body_bytes.max(1);
        self
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
            client_identity: None,
            proxy: None,
            redirect_policy: RedirectPolicy::follow(),
            max_response_body_bytes: DEFAULT_MAX_RESPONSE_BODY_BYTES,
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}
