//! Process-wide server state.

use std::sync::Arc;
use std::time::Duration;

use log::info;

use crate::commons::{Error, KeyServerResult};
use crate::config::Config;
use crate::server::cache::IssuanceCache;
use crate::server::pool::WorkerPool;
use crate::signing::{CaKey, IssuanceBackend, OpenSslIssuer};


//------------ ServerContext -------------------------------------------------

/// Everything the event loop needs besides its sockets.
///
/// The context is created once at startup and passed to the event loop
/// explicitly. It owns the issuance cache which in turn owns the worker
/// pool and a reference to the CA key.
pub struct ServerContext {
    cache: IssuanceCache,
    poll_timeout: Duration,
}

impl ServerContext {
    pub fn new(
        ca: Arc<CaKey>,
        backend: Arc<dyn IssuanceBackend>,
        threads: usize,
        poll_timeout: Duration,
    ) -> KeyServerResult<Self> {
        let pool = WorkerPool::new(threads)?;
        Ok(ServerContext {
            cache: IssuanceCache::new(ca, backend, pool),
            poll_timeout,
        })
    }

    /// Loads the CA key and sets up OpenSSL issuance from the config.
    pub fn from_config(config: &Config) -> KeyServerResult<Self> {
        let ca_key = config.ca_key().ok_or_else(|| {
            Error::pem("no CA key configured")
        })?;
        let ca = Arc::new(CaKey::load(ca_key, &config.issuer)?);
        let backend = OpenSslIssuer::new(
            config.key_bits, config.validity_days
        );
        info!(
            "Issuing {} bit RSA keys valid for {} days using {} worker threads",
            config.key_bits, config.validity_days, config.threads
        );
        Self::new(
            ca, Arc::new(backend), config.threads, config.poll_timeout()
        )
    }

    pub fn cache(&self) -> &IssuanceCache {
        &self.cache
    }

    pub fn poll_timeout(&self) -> Duration {
        self.poll_timeout
    }
}


//------------ Tests ---------------------------------------------------------
