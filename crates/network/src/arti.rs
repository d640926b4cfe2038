//! Embedded Tor client via Arti.
//!
//! The session is a bootstrapped [`TorClient`]. Bootstrap progress reports are
//! forwarded as status lines while the directory is fetched. Each circuit is an
//! isolated client, so streams from different runs never share a circuit.
//!
//! Arti pulls in the `rsa` crate, which carries RUSTSEC-2023-0071 (Marvin
//! timing side-channel). Prefer [`UpstreamProvider`](crate::provider::UpstreamProvider)
//! with a C-Tor daemon where that matters.

use async_trait::async_trait;
use futures::StreamExt;
use tracing::debug;

use arti_client::{DataStream, TorClient, TorClientConfig};
use tor_rtcompat::PreferredRuntime;

use crate::error::{Result, TrowserError};
use crate::events::StatusEmitter;
use crate::provider::{Circuit, CircuitProvider, CircuitSession};

#[derive(Debug, Clone, Default)]
pub struct ArtiProvider {
    config: TorClientConfig,
}

impl ArtiProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: TorClientConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl CircuitProvider for ArtiProvider {
    type Session = ArtiSession;

    async fn open_session(&self, events: &StatusEmitter) -> Result<ArtiSession> {
        events.emit("Bootstrapping embedded Tor client");

        let client = TorClient::builder()
            .config(self.config.clone())
            .create_unbootstrapped()
            .map_err(|e| TrowserError::CircuitConstruction(e.to_string()))?;

        let mut progress = client.bootstrap_events();
        {
            let bootstrap = client.bootstrap();
            tokio::pin!(bootstrap);

            loop {
                tokio::select! {
                    done = &mut bootstrap => {
                        done.map_err(|e| {
                            TrowserError::CircuitConstruction(format!("Tor bootstrap failed: {}", e))
                        })?;
                        break;
                    }
                    Some(status) = progress.next() => events.emit(status.to_string()),
                }
            }
        }
        events.emit("Tor bootstrap complete");

        Ok(ArtiSession { client })
    }
}

pub struct ArtiSession {
    client: TorClient<PreferredRuntime>,
}

#[async_trait]
impl CircuitSession for ArtiSession {
    type Circuit = ArtiCircuit;

    async fn build_circuit(&self, events: &StatusEmitter) -> Result<ArtiCircuit> {
        let client = self.client.isolated_client();
        events.emit("Created isolated Tor circuit group");
        Ok(ArtiCircuit { client })
    }

    async fn close(&self) -> Result<()> {
        debug!("Releasing embedded Tor client");
        Ok(())
    }
}

pub struct ArtiCircuit {
    client: TorClient<PreferredRuntime>,
}

#[async_trait]
impl Circuit for ArtiCircuit {
    type Stream = DataStream;

    async fn connect(&self, host: &str, port: u16) -> Result<DataStream> {
        self.client
            .connect(format!("{}:{}", host, port))
            .await
            .map_err(|e| {
                TrowserError::Connection(format!("Tor connect to {}:{} failed: {}", host, port, e))
            })
    }

    async fn close(&self) -> Result<()> {
        debug!("Releasing isolated Tor circuit group");
        Ok(())
    }
}
