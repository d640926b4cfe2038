//! Consumer side of the bootstrap: the queue a UI loop or CLI drains.

use tokio::sync::{mpsc, watch};

use crate::monitor::{ConnectionState, StatusSnapshot};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// Fired once, when the proxy first becomes usable.
    Ready { landing_url: String },
    /// `state` is the state the line was produced in, not the current one.
    StatusChanged {
        state: ConnectionState,
        status: String,
    },
}

/// Callbacks for consumers that prefer push-style delivery.
pub trait BootstrapObserver {
    fn on_ready(&mut self, landing_url: &str);
    fn on_status_changed(&mut self, state: ConnectionState, status: &str);
}

pub struct ConsumerBinding {
    queue: mpsc::UnboundedReceiver<Notification>,
    snapshot: watch::Receiver<StatusSnapshot>,
}

impl ConsumerBinding {
    pub(crate) fn new(
        queue: mpsc::UnboundedReceiver<Notification>,
        snapshot: watch::Receiver<StatusSnapshot>,
    ) -> Self {
        Self { queue, snapshot }
    }

    /// Next notification, or `None` once the runner has finished and the queue
    /// is empty.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.queue.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Notification> {
        self.queue.try_recv().ok()
    }

    /// Deliver everything queued so far without waiting. Meant to be called
    /// from the consumer's own event loop turn.
    pub fn dispatch(&mut self, observer: &mut impl BootstrapObserver) -> usize {
        let mut delivered = 0;
        while let Some(notification) = self.try_recv() {
            deliver(observer, &notification);
            delivered += 1;
        }
        delivered
    }

    /// Deliver notifications until the runner goes away.
    pub async fn run(mut self, observer: &mut impl BootstrapObserver) {
        while let Some(notification) = self.recv().await {
            deliver(observer, &notification);
        }
    }

    /// Current state, which may be ahead of what is still queued.
    pub fn state(&self) -> ConnectionState {
        self.snapshot.borrow().state
    }

    pub fn status(&self) -> String {
        self.snapshot.borrow().status.clone()
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Latest snapshot on subscribe, then every change.
    pub fn subscribe(&self) -> watch::Receiver<StatusSnapshot> {
        self.snapshot.clone()
    }
}

fn deliver(observer: &mut impl BootstrapObserver, notification: &Notification) {
    match notification {
        Notification::Ready { landing_url } => observer.on_ready(landing_url),
        Notification::StatusChanged { state, status } => observer.on_status_changed(*state, status),
    }
}
