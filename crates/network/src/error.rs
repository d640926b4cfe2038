use thiserror::Error;

pub type Result<T> = std::result::Result<T, TrowserError>;

#[derive(Error, Debug)]
pub enum TrowserError {
    #[error("Failed to allocate local port: {0}")]
    PortAllocation(#[source] std::io::Error),

    #[error("Circuit construction failed: {0}")]
    CircuitConstruction(String),

    #[error("SOCKS proxy failed: {0}")]
    ProxyServe(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Proxy already configured for {current}, refusing to switch to {requested}")]
    ProxyConflict { current: String, requested: String },

    #[error("Proxy not configured")]
    ProxyNotConfigured,

    #[error("No async runtime available to run the proxy")]
    NoRuntime,

    #[error("Tor not available")]
    TorNotAvailable,
}
