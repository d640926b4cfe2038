use serde::{Deserialize, Serialize};

use crate::error::{Result, TrowserError};

pub const DEFAULT_LISTEN_HOST: &str = "127.0.0.1";
pub const DEFAULT_TOR_SOCKS_ADDR: &str = "127.0.0.1:9050";
pub const DEFAULT_LANDING_URL: &str = "https://check.torproject.org";
pub const DEFAULT_NEW_TAB_URL: &str = "https://ddg.gg";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Host the local SOCKS endpoint binds to.
    pub listen_host: String,
    /// 0 lets the OS pick an ephemeral port.
    pub socks_port: u16,
    /// Page delivered with the ready notification.
    pub landing_url: String,
    pub new_tab_url: String,
    /// Tor daemon used by the upstream provider.
    pub upstream_socks_addr: String,
    pub timeout_secs: u64,
    pub verify_tls: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            listen_host: DEFAULT_LISTEN_HOST.to_string(),
            socks_port: 0,
            landing_url: DEFAULT_LANDING_URL.to_string(),
            new_tab_url: DEFAULT_NEW_TAB_URL.to_string(),
            upstream_socks_addr: DEFAULT_TOR_SOCKS_ADDR.to_string(),
            timeout_secs: 60,
            verify_tls: true,
        }
    }
}

impl Config {
    /// Defaults overridden by `TROWSER_*` / `TOR_SOCKS_ADDR` variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(host) = lookup("TROWSER_LISTEN_HOST") {
            config.listen_host = host;
        }
        if let Some(port) = lookup("TROWSER_SOCKS_PORT") {
            config.socks_port = port
                .parse()
                .map_err(|e| TrowserError::Config(format!("Invalid TROWSER_SOCKS_PORT: {}", e)))?;
        }
        if let Some(url) = lookup("TROWSER_LANDING_URL") {
            config.landing_url = url;
        }
        if let Some(url) = lookup("TROWSER_NEW_TAB_URL") {
            config.new_tab_url = url;
        }
        if let Some(addr) = lookup("TOR_SOCKS_ADDR") {
            config.upstream_socks_addr = addr;
        }
        if let Some(secs) = lookup("TROWSER_TIMEOUT_SECS") {
            config.timeout_secs = secs
                .parse()
                .map_err(|e| TrowserError::Config(format!("Invalid TROWSER_TIMEOUT_SECS: {}", e)))?;
        }

        Ok(config)
    }

    pub fn with_listen_host(mut self, host: impl Into<String>) -> Self {
        self.listen_host = host.into();
        self
    }

    pub fn with_socks_port(mut self, port: u16) -> Self {
        self.socks_port = port;
        self
    }

    pub fn with_landing_url(mut self, url: impl Into<String>) -> Self {
        self.landing_url = url.into();
        self
    }

    pub fn with_new_tab_url(mut self, url: impl Into<String>) -> Self {
        self.new_tab_url = url.into();
        self
    }

    pub fn with_upstream_socks_addr(mut self, addr: impl Into<String>) -> Self {
        self.upstream_socks_addr = addr.into();
        self
    }

    pub fn with_timeout(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn without_tls_verify(mut self) -> Self {
        self.verify_tls = false;
        self
    }
}
