//! Startup wiring: port, process proxy settings, monitor, then the runner.

use std::sync::Arc;

use tracing::info;

use crate::binding::ConsumerBinding;
use crate::config::Config;
use crate::error::{Result, TrowserError};
use crate::events::StatusEmitter;
use crate::monitor::StatusMonitor;
use crate::port::{self, ProxyEndpoint};
use crate::provider::CircuitProvider;
use crate::proxy_settings::ProxySettings;
use crate::runner::{CircuitProxyRunner, RunOutcome, RunnerHandle};

pub struct Bootstrap {
    handle: RunnerHandle,
    binding: ConsumerBinding,
}

/// Start bringing up the proxy without waiting for it.
///
/// Must be called from within a tokio runtime. `settings` is pointed at the
/// endpoint before the runner starts, and the consumer binding exists before
/// the first status line can be produced.
pub fn launch<P: CircuitProvider>(
    provider: P,
    config: &Config,
    settings: &ProxySettings,
) -> Result<Bootstrap> {
    tokio::runtime::Handle::try_current().map_err(|_| TrowserError::NoRuntime)?;

    let endpoint = if config.socks_port == 0 {
        port::allocate(&config.listen_host)?
    } else {
        ProxyEndpoint::new(config.listen_host.clone(), config.socks_port)
    };
    settings.apply(&endpoint)?;

    let (monitor, binding) = StatusMonitor::new(config.landing_url.clone());
    let events = StatusEmitter::new(Arc::new(monitor));
    let handle = CircuitProxyRunner::new(provider).start(endpoint, events)?;
    info!("Proxy bootstrap started on {}", handle.endpoint());

    Ok(Bootstrap { handle, binding })
}

impl Bootstrap {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        self.handle.endpoint()
    }

    pub fn binding(&mut self) -> &mut ConsumerBinding {
        &mut self.binding
    }

    pub fn into_parts(self) -> (RunnerHandle, ConsumerBinding) {
        (self.handle, self.binding)
    }

    pub async fn stop(self) -> RunOutcome {
        self.handle.stop().await
    }
}
