use std::net::TcpListener;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::DuplexStream;

use trowser_net::{
    launch, Circuit, CircuitProvider, CircuitSession, Config, ConnectionState, ConsumerBinding,
    Notification, ProxySettings, Result, RunOutcome, StatusEmitter, TrowserError,
};

#[derive(Default)]
struct Ledger {
    sessions_opened: AtomicUsize,
    sessions_closed: AtomicUsize,
    circuits_built: AtomicUsize,
    circuits_closed: AtomicUsize,
}

impl Ledger {
    fn counts(&self) -> [usize; 4] {
        [
            self.sessions_opened.load(Ordering::SeqCst),
            self.sessions_closed.load(Ordering::SeqCst),
            self.circuits_built.load(Ordering::SeqCst),
            self.circuits_closed.load(Ordering::SeqCst),
        ]
    }
}

#[derive(Clone, Copy)]
enum Behavior {
    Ready,
    FailCircuit,
    HangCircuit,
}

struct MockProvider {
    ledger: Arc<Ledger>,
    behavior: Behavior,
}

struct MockSession {
    ledger: Arc<Ledger>,
    behavior: Behavior,
}

struct MockCircuit {
    ledger: Arc<Ledger>,
}

#[async_trait]
impl CircuitProvider for MockProvider {
    type Session = MockSession;

    async fn open_session(&self, events: &StatusEmitter) -> Result<MockSession> {
        self.ledger.sessions_opened.fetch_add(1, Ordering::SeqCst);
        events.emit("Connecting to guard relay");
        Ok(MockSession {
            ledger: self.ledger.clone(),
            behavior: self.behavior,
        })
    }
}

#[async_trait]
impl CircuitSession for MockSession {
    type Circuit = MockCircuit;

    async fn build_circuit(&self, events: &StatusEmitter) -> Result<MockCircuit> {
        match self.behavior {
            Behavior::Ready => {
                self.ledger.circuits_built.fetch_add(1, Ordering::SeqCst);
                events.emit("Circuit built");
                Ok(MockCircuit {
                    ledger: self.ledger.clone(),
                })
            }
            Behavior::FailCircuit => Err(TrowserError::CircuitConstruction(
                "no guard relays reachable".into(),
            )),
            Behavior::HangCircuit => {
                events.emit("Extending circuit");
                std::future::pending().await
            }
        }
    }

    async fn close(&self) -> Result<()> {
        self.ledger.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[async_trait]
impl Circuit for MockCircuit {
    type Stream = DuplexStream;

    async fn connect(&self, _host: &str, _port: u16) -> Result<DuplexStream> {
        Err(TrowserError::Connection("mock circuit carries no streams".into()))
    }

    async fn close(&self) -> Result<()> {
        self.ledger.circuits_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn mock(behavior: Behavior) -> (MockProvider, Arc<Ledger>) {
    let ledger = Arc::new(Ledger::default());
    let provider = MockProvider {
        ledger: ledger.clone(),
        behavior,
    };
    (provider, ledger)
}

async fn wait_for_status(binding: &mut ConsumerBinding, needle: &str) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Some(notification) = binding.recv().await {
        let done = matches!(&notification, Notification::StatusChanged { status, .. } if status.contains(needle));
        seen.push(notification);
        if done {
            return seen;
        }
    }
    panic!("queue closed before status containing {:?}", needle);
}

async fn drain(binding: &mut ConsumerBinding) -> Vec<Notification> {
    let mut seen = Vec::new();
    while let Some(notification) = binding.recv().await {
        seen.push(notification);
    }
    seen
}

fn ready_count(notifications: &[Notification]) -> usize {
    notifications
        .iter()
        .filter(|n| matches!(n, Notification::Ready { .. }))
        .count()
}

#[tokio::test]
async fn test_stop_before_ready_releases_session() {
    let (provider, ledger) = mock(Behavior::HangCircuit);
    let settings = ProxySettings::new();
    let (handle, mut binding) = launch(provider, &Config::default(), &settings)
        .unwrap()
        .into_parts();

    let seen = wait_for_status(&mut binding, "Extending circuit").await;
    assert_eq!(ready_count(&seen), 0);

    assert_eq!(handle.stop().await, RunOutcome::Stopped);
    assert_eq!(ledger.counts(), [1, 1, 0, 0]);
    assert_eq!(binding.state(), ConnectionState::Connecting);
    assert_eq!(ready_count(&drain(&mut binding).await), 0);
}

#[tokio::test]
async fn test_stop_after_ready_releases_circuit_and_session() {
    let (provider, ledger) = mock(Behavior::Ready);
    let settings = ProxySettings::new();
    let (handle, mut binding) = launch(provider, &Config::default(), &settings)
        .unwrap()
        .into_parts();
    let endpoint = handle.endpoint().clone();

    let seen = wait_for_status(&mut binding, "Start socks proxy at").await;
    assert_eq!(ready_count(&seen), 1);
    assert_eq!(
        seen.last(),
        Some(&Notification::StatusChanged {
            state: ConnectionState::Connected,
            status: format!("Connected to network. (Start socks proxy at {})", endpoint),
        })
    );

    assert_eq!(handle.stop().await, RunOutcome::Stopped);
    assert_eq!(ledger.counts(), [1, 1, 1, 1]);

    // the listener is gone once stop returns
    assert!(tokio::net::TcpStream::connect(endpoint.socket_addr().unwrap())
        .await
        .is_err());
}

#[tokio::test]
async fn test_circuit_failure_is_reported_as_status() {
    let (provider, ledger) = mock(Behavior::FailCircuit);
    let settings = ProxySettings::new();
    let (handle, mut binding) = launch(provider, &Config::default(), &settings)
        .unwrap()
        .into_parts();

    let seen = drain(&mut binding).await;
    assert_eq!(ready_count(&seen), 0);
    assert_eq!(
        seen.last(),
        Some(&Notification::StatusChanged {
            state: ConnectionState::Connecting,
            status:
                "Connecting to network... (Circuit construction failed: no guard relays reachable)"
                    .to_string(),
        })
    );
    assert_eq!(binding.state(), ConnectionState::Connecting);

    assert_eq!(handle.join().await, RunOutcome::Failed);
    assert_eq!(ledger.counts(), [1, 1, 0, 0]);
}

#[tokio::test]
async fn test_bind_failure_is_reported_as_status() {
    let occupied = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = occupied.local_addr().unwrap().port();

    let (provider, ledger) = mock(Behavior::Ready);
    let settings = ProxySettings::new();
    let config = Config::default().with_socks_port(port);
    let (handle, mut binding) = launch(provider, &config, &settings)
        .unwrap()
        .into_parts();

    let seen = drain(&mut binding).await;
    assert_eq!(ready_count(&seen), 0);
    match seen.last() {
        Some(Notification::StatusChanged { status, .. }) => {
            assert!(status.starts_with("Connecting to network... (SOCKS proxy failed: Failed to bind"));
        }
        other => panic!("unexpected last notification {:?}", other),
    }

    assert_eq!(handle.join().await, RunOutcome::Failed);
    assert_eq!(ledger.counts(), [1, 1, 1, 1]);
    drop(occupied);
}

#[tokio::test]
async fn test_refused_stream_does_not_stop_proxy() {
    let (provider, _ledger) = mock(Behavior::Ready);
    let settings = ProxySettings::new();
    let (handle, mut binding) = launch(provider, &Config::default(), &settings)
        .unwrap()
        .into_parts();
    wait_for_status(&mut binding, "Start socks proxy at").await;

    let proxy = handle.endpoint().socket_addr().unwrap();
    for _ in 0..2 {
        let err = tokio_socks::tcp::Socks5Stream::connect(proxy, ("ddg.gg", 443))
            .await
            .err()
            .unwrap();
        assert!(err.to_string().to_lowercase().contains("refused"));
    }

    assert!(!handle.is_finished());
    assert_eq!(handle.stop().await, RunOutcome::Stopped);
}
