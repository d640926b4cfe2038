//! Local endpoint selection for the SOCKS listener.
//!
//! The port is found by binding a throwaway listener to port 0 and reading back
//! what the OS assigned. The socket is closed before the runner binds again, so
//! another process may grab the port in between. That window is accepted.

use std::fmt;
use std::net::{SocketAddr, TcpListener};

use crate::error::{Result, TrowserError};

/// Where the local SOCKS5 proxy listens. Fixed for the life of the process.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProxyEndpoint {
    host: String,
    port: u16,
}

impl ProxyEndpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn socket_addr(&self) -> Result<SocketAddr> {
        self.to_string()
            .parse()
            .map_err(|e| TrowserError::Config(format!("Invalid proxy endpoint {}: {}", self, e)))
    }

    /// `socks5h` so hostnames are resolved on the far side of the circuit.
    pub fn socks_url(&self) -> String {
        format!("socks5h://{}", self)
    }
}

/// `host:port`, with IPv6 literals bracketed.
impl fmt::Display for ProxyEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') && !self.host.starts_with('[') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ask the OS for a free port on `host`. Sequential calls may or may not return
/// the same port.
pub fn allocate(host: &str) -> Result<ProxyEndpoint> {
    let listener = TcpListener::bind((host, 0)).map_err(TrowserError::PortAllocation)?;
    let port = listener
        .local_addr()
        .map_err(TrowserError::PortAllocation)?
        .port();
    drop(listener);

    tracing::debug!("Allocated local port {} on {}", port, host);
    Ok(ProxyEndpoint::new(host, port))
}
