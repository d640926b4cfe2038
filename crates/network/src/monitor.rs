//! Readiness state machine driven by the status stream.
//!
//! The circuit stack announces that the local proxy is usable by logging a line
//! starting with [`READY_MARKER`]. The first such line flips the state to
//! [`ConnectionState::Connected`] and fires the ready notification once. Every
//! line, before and after, produces a fresh display string.

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use crate::binding::{ConsumerBinding, Notification};
use crate::events::{EventSink, StatusEvent};

pub const READY_MARKER: &str = "Start socks proxy at";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Connecting,
    Connected,
}

/// The readiness rule. Swap via [`StatusMonitor::with_readiness`] if the
/// collaborator ever offers a structured signal.
pub fn is_ready_marker(message: &str) -> bool {
    message.starts_with(READY_MARKER)
}

pub fn display_status(state: ConnectionState, raw_message: &str) -> String {
    match state {
        ConnectionState::Connecting => format!("Connecting to network... ({})", raw_message),
        ConnectionState::Connected => format!("Connected to network. ({})", raw_message),
    }
}

/// State and display string, always updated together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusSnapshot {
    pub state: ConnectionState,
    /// Empty before the first event.
    pub status: String,
}

impl Default for StatusSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Connecting,
            status: String::new(),
        }
    }
}

pub struct StatusMonitor {
    landing_url: String,
    readiness: fn(&str) -> bool,
    snapshot: watch::Sender<StatusSnapshot>,
    notifications: mpsc::UnboundedSender<Notification>,
}

impl StatusMonitor {
    /// Creates the monitor together with its consumer side. The binding exists
    /// before any event can be produced, so nothing is lost to a late consumer.
    pub fn new(landing_url: impl Into<String>) -> (Self, ConsumerBinding) {
        let (notifications, queue) = mpsc::unbounded_channel();
        let (snapshot, snapshot_rx) = watch::channel(StatusSnapshot::default());

        let monitor = Self {
            landing_url: landing_url.into(),
            readiness: is_ready_marker,
            snapshot,
            notifications,
        };
        (monitor, ConsumerBinding::new(queue, snapshot_rx))
    }

    pub fn with_readiness(mut self, rule: fn(&str) -> bool) -> Self {
        self.readiness = rule;
        self
    }

    pub fn on_event(&self, event: &StatusEvent) {
        let is_marker = (self.readiness)(&event.raw_message);

        // Queued under the watch lock so queue order matches state order.
        self.snapshot.send_modify(|current| {
            if is_marker && current.state == ConnectionState::Connecting {
                current.state = ConnectionState::Connected;
                info!("Proxy ready ({})", event.raw_message);
                self.notify(Notification::Ready {
                    landing_url: self.landing_url.clone(),
                });
            }

            current.status = display_status(current.state, &event.raw_message);
            self.notify(Notification::StatusChanged {
                state: current.state,
                status: current.status.clone(),
            });
        });
    }

    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    /// Latest display string, empty before the first event.
    pub fn status(&self) -> String {
        self.snapshot.borrow().status.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.subscribe()
    }

    fn notify(&self, notification: Notification) {
        if self.notifications.send(notification).is_err() {
            debug!("Consumer binding dropped, notification discarded");
        }
    }
}

impl EventSink for StatusMonitor {
    fn emit(&self, event: StatusEvent) {
        self.on_event(&event);
    }
}
