//! Process-wide outbound proxy configuration.
//!
//! Applied once at startup, before the proxy is actually listening. Requests made
//! in the meantime simply fail until the circuit is up. Never reset.

use std::sync::RwLock;

use once_cell::sync::Lazy;
use tracing::{debug, info};

use crate::error::{Result, TrowserError};
use crate::port::ProxyEndpoint;

static GLOBAL: Lazy<ProxySettings> = Lazy::new(ProxySettings::new);

#[derive(Debug, Default)]
pub struct ProxySettings {
    endpoint: RwLock<Option<ProxyEndpoint>>,
}

impl ProxySettings {
    /// An isolated instance. Most callers want [`ProxySettings::global`].
    pub fn new() -> Self {
        Self::default()
    }

    pub fn global() -> &'static ProxySettings {
        &GLOBAL
    }

    /// Route outbound traffic through the SOCKS5 proxy at `endpoint`.
    /// Re-applying the same endpoint is a no-op.
    pub fn apply(&self, endpoint: &ProxyEndpoint) -> Result<()> {
        let mut current = self
            .endpoint
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        match current.as_ref() {
            Some(existing) if existing == endpoint => {
                debug!("Proxy already set to {}", endpoint);
                Ok(())
            }
            Some(existing) => Err(TrowserError::ProxyConflict {
                current: existing.to_string(),
                requested: endpoint.to_string(),
            }),
            None => {
                info!("Routing outbound traffic through SOCKS5 proxy at {}", endpoint);
                *current = Some(endpoint.clone());
                Ok(())
            }
        }
    }

    pub fn endpoint(&self) -> Option<ProxyEndpoint> {
        self.endpoint
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    pub fn proxy_url(&self) -> Option<String> {
        self.endpoint().map(|endpoint| endpoint.socks_url())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unconfigured() {
        let settings = ProxySettings::new();
        assert!(settings.endpoint().is_none());
        assert!(settings.proxy_url().is_none());
    }

    #[test]
    fn test_apply_is_idempotent() {
        let settings = ProxySettings::new();
        let endpoint = ProxyEndpoint::new("127.0.0.1", 40123);

        settings.apply(&endpoint).unwrap();
        let once = settings.endpoint();
        settings.apply(&endpoint).unwrap();

        assert_eq!(settings.endpoint(), once);
        assert_eq!(
            settings.proxy_url().as_deref(),
            Some("socks5h://127.0.0.1:40123")
        );
    }

    #[test]
    fn test_ipv6_loopback_endpoint() {
        let settings = ProxySettings::new();
        settings.apply(&ProxyEndpoint::new("::1", 39663)).unwrap();

        assert_eq!(
            settings.proxy_url().as_deref(),
            Some("socks5h://[::1]:39663")
        );
        assert!(settings.endpoint().unwrap().socket_addr().is_ok());
    }

    #[test]
    fn test_switching_endpoint_is_rejected() {
        let settings = ProxySettings::new();
        settings.apply(&ProxyEndpoint::new("127.0.0.1", 1111)).unwrap();

        let err = settings
            .apply(&ProxyEndpoint::new("127.0.0.1", 2222))
            .unwrap_err();
        assert!(matches!(err, TrowserError::ProxyConflict { .. }));
        assert_eq!(settings.endpoint().unwrap().port(), 1111);
    }
}
