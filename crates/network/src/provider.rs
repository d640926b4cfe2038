//! Boundary with the circuit-building collaborator.
//!
//! A provider hands out a session, a session builds circuits, and a circuit
//! opens streams to remote hosts. The runner owns what it acquires and calls
//! `close` on every exit path.

use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_socks::tcp::Socks5Stream;
use tracing::debug;

use crate::config::DEFAULT_TOR_SOCKS_ADDR;
use crate::error::{Result, TrowserError};
use crate::events::StatusEmitter;

#[async_trait]
pub trait CircuitProvider: Send + Sync + 'static {
    type Session: CircuitSession;

    async fn open_session(&self, events: &StatusEmitter) -> Result<Self::Session>;
}

#[async_trait]
pub trait CircuitSession: Send + Sync + 'static {
    type Circuit: Circuit;

    async fn build_circuit(&self, events: &StatusEmitter) -> Result<Self::Circuit>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait Circuit: Send + Sync + 'static {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream>;

    async fn close(&self) -> Result<()>;
}

/// Routes through a Tor daemon that is already running locally.
#[derive(Debug, Clone)]
pub struct UpstreamProvider {
    socks_addr: String,
}

impl UpstreamProvider {
    pub fn new(socks_addr: impl Into<String>) -> Self {
        Self {
            socks_addr: socks_addr.into(),
        }
    }

    pub fn socks_addr(&self) -> &str {
        &self.socks_addr
    }
}

impl Default for UpstreamProvider {
    fn default() -> Self {
        Self::new(DEFAULT_TOR_SOCKS_ADDR)
    }
}

#[async_trait]
impl CircuitProvider for UpstreamProvider {
    type Session = UpstreamSession;

    async fn open_session(&self, events: &StatusEmitter) -> Result<UpstreamSession> {
        let proxy_addr: SocketAddr = self
            .socks_addr
            .parse()
            .map_err(|e| TrowserError::Config(format!("Invalid SOCKS address: {}", e)))?;

        events.emit(format!("Connecting to Tor SOCKS proxy at {}", proxy_addr));
        TcpStream::connect(proxy_addr).await.map_err(|e| {
            TrowserError::CircuitConstruction(format!(
                "Tor SOCKS proxy at {} unreachable: {}",
                proxy_addr, e
            ))
        })?;
        events.emit(format!("Tor SOCKS proxy at {} is reachable", proxy_addr));

        Ok(UpstreamSession { proxy_addr })
    }
}

pub struct UpstreamSession {
    proxy_addr: SocketAddr,
}

#[async_trait]
impl CircuitSession for UpstreamSession {
    type Circuit = UpstreamCircuit;

    async fn build_circuit(&self, events: &StatusEmitter) -> Result<UpstreamCircuit> {
        // Distinct SOCKS credentials put our streams on their own circuit
        // (IsolateSOCKSAuth is on by default in tor).
        let isolation: u64 = rand::random();
        let circuit = UpstreamCircuit {
            proxy_addr: self.proxy_addr,
            username: format!("trowser-{:016x}", isolation),
            password: format!("{:016x}", rand::random::<u64>()),
        };
        events.emit(format!("Created circuit isolation group {:016x}", isolation));
        Ok(circuit)
    }

    async fn close(&self) -> Result<()> {
        debug!("Released upstream session for {}", self.proxy_addr);
        Ok(())
    }
}

pub struct UpstreamCircuit {
    proxy_addr: SocketAddr,
    username: String,
    password: String,
}

#[async_trait]
impl Circuit for UpstreamCircuit {
    type Stream = Socks5Stream<TcpStream>;

    async fn connect(&self, host: &str, port: u16) -> Result<Self::Stream> {
        Socks5Stream::connect_with_password(
            self.proxy_addr,
            (host, port),
            &self.username,
            &self.password,
        )
        .await
        .map_err(|e| TrowserError::Connection(format!("SOCKS5 connection failed: {}", e)))
    }

    async fn close(&self) -> Result<()> {
        debug!("Released circuit {}", self.username);
        Ok(())
    }
}

/// Connects straight to the destination. No anonymity, for tests only.
#[cfg(any(test, feature = "test-utils"))]
#[derive(Debug, Clone, Default)]
pub struct DirectProvider;

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl CircuitProvider for DirectProvider {
    type Session = DirectProvider;

    async fn open_session(&self, events: &StatusEmitter) -> Result<DirectProvider> {
        events.emit("Opened direct session");
        Ok(DirectProvider)
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl CircuitSession for DirectProvider {
    type Circuit = DirectProvider;

    async fn build_circuit(&self, events: &StatusEmitter) -> Result<DirectProvider> {
        events.emit("Built direct circuit");
        Ok(DirectProvider)
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(any(test, feature = "test-utils"))]
#[async_trait]
impl Circuit for DirectProvider {
    type Stream = TcpStream;

    async fn connect(&self, host: &str, port: u16) -> Result<TcpStream> {
        TcpStream::connect((host, port))
            .await
            .map_err(|e| TrowserError::Connection(e.to_string()))
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StatusEvent;
    use std::sync::{Arc, Mutex};

    fn recording_emitter() -> (StatusEmitter, Arc<Mutex<Vec<String>>>) {
        let lines = Arc::new(Mutex::new(Vec::new()));
        let sink = lines.clone();
        let emitter = StatusEmitter::new(Arc::new(move |event: StatusEvent| {
            sink.lock().unwrap().push(event.raw_message);
        }));
        (emitter, lines)
    }

    #[tokio::test]
    async fn test_upstream_unreachable_is_circuit_error() {
        // grab a port and close it so nothing is listening there
        let endpoint = crate::port::allocate("127.0.0.1").unwrap();
        let provider = UpstreamProvider::new(endpoint.to_string());
        let (events, lines) = recording_emitter();

        let err = provider.open_session(&events).await.err().unwrap();
        assert!(matches!(err, TrowserError::CircuitConstruction(_)));
        assert_eq!(lines.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_upstream_invalid_addr() {
        let provider = UpstreamProvider::new("not an address");
        let (events, _) = recording_emitter();

        let err = provider.open_session(&events).await.err().unwrap();
        assert!(matches!(err, TrowserError::Config(_)));
    }

    #[tokio::test]
    async fn test_upstream_circuits_are_isolated() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let provider = UpstreamProvider::new(listener.local_addr().unwrap().to_string());
        let (events, lines) = recording_emitter();

        let session = provider.open_session(&events).await.unwrap();
        let first = session.build_circuit(&events).await.unwrap();
        let second = session.build_circuit(&events).await.unwrap();

        assert_ne!(first.username, second.username);
        assert_eq!(lines.lock().unwrap().len(), 4);
        session.close().await.unwrap();
    }

    #[test]
    fn test_default_upstream_is_local_tor() {
        assert_eq!(UpstreamProvider::default().socks_addr(), "127.0.0.1:9050");
    }
}
