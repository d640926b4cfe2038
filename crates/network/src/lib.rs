//! This crate brings up a local SOCKS5 proxy backed by a Tor circuit and tells the
//! consumer, without blocking it, when the proxy becomes usable.
//!
//! ```rust,no_run
//! use trowser_net::{Config, Notification};
//!
//! #[tokio::main]
//! async fn main() -> trowser_net::Result<()> {
//!     let config = Config::default();
//!     let mut bootstrap = trowser_net::launch_with_tor_daemon(&config)?;
//!
//!     while let Some(notification) = bootstrap.binding().recv().await {
//!         match notification {
//!             Notification::StatusChanged { status, .. } => println!("{}", status),
//!             Notification::Ready { landing_url } => {
//!                 println!("Ready, open {}", landing_url);
//!                 break;
//!             }
//!         }
//!     }
//!
//!     bootstrap.stop().await;
//!     Ok(())
//! }
//! ```

#[cfg(feature = "arti")]
pub mod arti;
pub mod binding;
pub mod bootstrap;
pub mod config;
pub mod error;
pub mod events;
pub mod http_client;
pub mod monitor;
pub mod port;
pub mod provider;
pub mod proxy_settings;
pub mod runner;
pub mod socks;

#[cfg(feature = "arti")]
pub use arti::ArtiProvider;
pub use binding::{BootstrapObserver, ConsumerBinding, Notification};
pub use bootstrap::{launch, Bootstrap};
pub use config::{Config, DEFAULT_LANDING_URL, DEFAULT_NEW_TAB_URL, DEFAULT_TOR_SOCKS_ADDR};
pub use error::{Result, TrowserError};
pub use events::{EventSink, StatusEmitter, StatusEvent};
pub use http_client::TorHttpClient;
pub use monitor::{ConnectionState, StatusMonitor, StatusSnapshot, READY_MARKER};
pub use port::ProxyEndpoint;
pub use provider::{Circuit, CircuitProvider, CircuitSession, UpstreamProvider};
pub use proxy_settings::ProxySettings;
pub use runner::{CircuitProxyRunner, RunOutcome, RunnerHandle};

pub fn launch_with_tor_daemon(config: &Config) -> Result<Bootstrap> {
    let provider = UpstreamProvider::new(config.upstream_socks_addr.clone());
    launch(provider, config, ProxySettings::global())
}

// no anonymity, just for testing
#[cfg(any(test, feature = "test-utils"))]
pub fn launch_direct(config: &Config, settings: &ProxySettings) -> Result<Bootstrap> {
    launch(provider::DirectProvider, config, settings)
}
