//! Status lines produced while the circuit is built and the proxy served.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// A single status line. `seq` gives the emission order within one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub raw_message: String,
    pub seq: u64,
}

impl StatusEvent {
    pub fn new(raw_message: impl Into<String>, seq: u64) -> Self {
        Self {
            raw_message: raw_message.into(),
            seq,
        }
    }
}

/// Receives every status event in emission order. Called from the runner task.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: StatusEvent);
}

impl<F> EventSink for F
where
    F: Fn(StatusEvent) + Send + Sync,
{
    fn emit(&self, event: StatusEvent) {
        self(event)
    }
}

/// Cloneable handle collaborators use to report progress.
#[derive(Clone)]
pub struct StatusEmitter {
    sink: Arc<dyn EventSink>,
    seq: Arc<AtomicU64>,
}

impl StatusEmitter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            seq: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn emit(&self, message: impl Into<String>) {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst);
        let event = StatusEvent::new(message, seq);
        tracing::debug!(seq, "{}", event.raw_message);
        self.sink.emit(event);
    }
}

impl fmt::Debug for StatusEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatusEmitter")
            .field("next_seq", &self.seq.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn test_emitter_numbers_events_in_order() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let emitter = StatusEmitter::new(Arc::new(move |event: StatusEvent| {
            sink.lock().unwrap().push(event);
        }));

        let clone = emitter.clone();
        emitter.emit("first");
        clone.emit("second");
        emitter.emit("third");

        let seen = seen.lock().unwrap();
        let messages: Vec<_> = seen.iter().map(|e| e.raw_message.as_str()).collect();
        assert_eq!(messages, vec!["first", "second", "third"]);
        let seqs: Vec<_> = seen.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![0, 1, 2]);
    }
}
