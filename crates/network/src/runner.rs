//! Background task that builds a circuit and serves it as a local SOCKS5 proxy.
//!
//! Lifecycle inside the task:
//!
//! 1. open a session with the provider
//! 2. build a circuit through that session
//! 3. bind the SOCKS listener and announce it with [`READY_MARKER`]
//! 4. relay client connections until stopped
//!
//! Whatever was acquired is closed again on the way out, whichever step ended
//! the run. Failures never cross the task boundary: they are reported as status
//! lines and the run ends. There is no retry, a failed run stays in
//! `Connecting` until the process is restarted.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::error::{Result, TrowserError};
use crate::events::StatusEmitter;
use crate::monitor::READY_MARKER;
use crate::port::ProxyEndpoint;
use crate::provider::{Circuit, CircuitProvider, CircuitSession};
use crate::socks;

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Ended by [`RunnerHandle::stop`].
    Stopped,
    /// Circuit construction or serving failed. Already reported as status.
    Failed,
}

pub struct CircuitProxyRunner<P> {
    provider: Arc<P>,
}

impl<P: CircuitProvider> CircuitProxyRunner<P> {
    pub fn new(provider: P) -> Self {
        Self {
            provider: Arc::new(provider),
        }
    }

    /// Spawns the run on the current tokio runtime and returns immediately.
    pub fn start(&self, endpoint: ProxyEndpoint, events: StatusEmitter) -> Result<RunnerHandle> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|_| TrowserError::NoRuntime)?;
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let task = runtime.spawn(run(
            self.provider.clone(),
            endpoint.clone(),
            events,
            shutdown_rx,
        ));
        info!("Started circuit proxy runner for {}", endpoint);

        Ok(RunnerHandle {
            endpoint,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Control over a running proxy. Dropping the handle detaches the task, which
/// then keeps serving for the rest of the process.
pub struct RunnerHandle {
    endpoint: ProxyEndpoint,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<RunOutcome>,
}

impl RunnerHandle {
    pub fn endpoint(&self) -> &ProxyEndpoint {
        &self.endpoint
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    pub fn request_stop(&self) {
        // errors only when the task already ended
        let _ = self.shutdown.send(true);
    }

    /// Stop and wait until the session and circuit have been released.
    pub async fn stop(self) -> RunOutcome {
        self.request_stop();
        self.join().await
    }

    /// Wait for the run to end on its own.
    pub async fn join(self) -> RunOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Circuit proxy task for {} aborted: {}", self.endpoint, e);
                RunOutcome::Failed
            }
        }
    }
}

async fn stopped(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            // handle dropped without stopping
            std::future::pending::<()>().await;
        }
    }
}

async fn run<P: CircuitProvider>(
    provider: Arc<P>,
    endpoint: ProxyEndpoint,
    events: StatusEmitter,
    mut shutdown: watch::Receiver<bool>,
) -> RunOutcome {
    let opened = tokio::select! {
        _ = stopped(&mut shutdown) => return RunOutcome::Stopped,
        opened = provider.open_session(&events) => opened,
    };
    let session = match opened {
        Ok(session) => session,
        Err(e) => return report_failure(&events, e),
    };

    let outcome = run_session(&session, &endpoint, &events, &mut shutdown).await;

    if let Err(e) = session.close().await {
        warn!("Failed to close Tor session: {}", e);
    }
    debug!("Circuit proxy for {} finished: {:?}", endpoint, outcome);
    outcome
}

async fn run_session<S: CircuitSession>(
    session: &S,
    endpoint: &ProxyEndpoint,
    events: &StatusEmitter,
    shutdown: &mut watch::Receiver<bool>,
) -> RunOutcome {
    let built = tokio::select! {
        _ = stopped(shutdown) => return RunOutcome::Stopped,
        built = session.build_circuit(events) => built,
    };
    let circuit = match built {
        Ok(circuit) => Arc::new(circuit),
        Err(e) => return report_failure(events, e),
    };

    let outcome = serve(circuit.clone(), endpoint, events, shutdown).await;

    if let Err(e) = circuit.close().await {
        warn!("Failed to close circuit: {}", e);
    }
    outcome
}

async fn serve<C: Circuit>(
    circuit: Arc<C>,
    endpoint: &ProxyEndpoint,
    events: &StatusEmitter,
    shutdown: &mut watch::Receiver<bool>,
) -> RunOutcome {
    let listener = match TcpListener::bind((endpoint.host(), endpoint.port())).await {
        Ok(listener) => listener,
        Err(e) => {
            let err = TrowserError::ProxyServe(format!("Failed to bind {}: {}", endpoint, e));
            return report_failure(events, err);
        }
    };
    let bound = listener
        .local_addr()
        .map(|addr| addr.to_string())
        .unwrap_or_else(|_| endpoint.to_string());
    info!("SOCKS5 proxy listening on {}", bound);
    events.emit(format!("{} {}", READY_MARKER, bound));

    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = stopped(shutdown) => break,
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    debug!("SOCKS5 connection from {}", peer);
                    let circuit = circuit.clone();
                    connections.spawn(async move {
                        if let Err(e) = socks::handle_connection(stream, circuit.as_ref()).await {
                            warn!("SOCKS5 connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("SOCKS5 accept error: {}", e);
                    tokio::time::sleep(ACCEPT_BACKOFF).await;
                }
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    info!("Stopping SOCKS5 proxy on {}", bound);
    connections.shutdown().await;
    RunOutcome::Stopped
}

fn report_failure(events: &StatusEmitter, err: TrowserError) -> RunOutcome {
    error!("{}", err);
    events.emit(err.to_string());
    RunOutcome::Failed
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binding::Notification;
    use crate::events::StatusEvent;
    use crate::monitor::StatusMonitor;
    use crate::port;
    use crate::provider::DirectProvider;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio_socks::tcp::Socks5Stream;

    #[test]
    fn test_start_outside_runtime() {
        let runner = CircuitProxyRunner::new(DirectProvider);
        let endpoint = ProxyEndpoint::new("127.0.0.1", 1);
        let events = StatusEmitter::new(Arc::new(|_: StatusEvent| {}));

        let err = runner.start(endpoint, events).err().unwrap();
        assert!(matches!(err, TrowserError::NoRuntime));
    }

    #[tokio::test]
    async fn test_relays_through_circuit() {
        let echo = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let echo_addr = echo.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = echo.accept().await.unwrap();
            let mut buf = [0u8; 4];
            stream.read_exact(&mut buf).await.unwrap();
            stream.write_all(&buf).await.unwrap();
        });

        let (monitor, mut binding) = StatusMonitor::new("https://check.torproject.org");
        let endpoint = port::allocate("127.0.0.1").unwrap();
        let handle = CircuitProxyRunner::new(DirectProvider)
            .start(endpoint.clone(), StatusEmitter::new(Arc::new(monitor)))
            .unwrap();

        loop {
            match binding.recv().await {
                Some(Notification::Ready { .. }) => break,
                Some(_) => continue,
                None => panic!("runner ended before becoming ready"),
            }
        }

        let mut stream = Socks5Stream::connect(
            endpoint.socket_addr().unwrap(),
            ("127.0.0.1", echo_addr.port()),
        )
        .await
        .unwrap();
        stream.write_all(b"ping").await.unwrap();
        let mut reply = [0u8; 4];
        stream.read_exact(&mut reply).await.unwrap();
        assert_eq!(&reply, b"ping");

        assert_eq!(handle.stop().await, RunOutcome::Stopped);
    }

    #[tokio::test]
    async fn test_dropped_handle_keeps_serving() {
        let (monitor, mut binding) = StatusMonitor::new("https://check.torproject.org");
        let endpoint = port::allocate("127.0.0.1").unwrap();
        let handle = CircuitProxyRunner::new(DirectProvider)
            .start(endpoint.clone(), StatusEmitter::new(Arc::new(monitor)))
            .unwrap();
        drop(handle);

        while let Some(notification) = binding.recv().await {
            if matches!(notification, Notification::Ready { .. }) {
                break;
            }
        }
        assert!(tokio::net::TcpStream::connect(endpoint.socket_addr().unwrap())
            .await
            .is_ok());
    }
}
