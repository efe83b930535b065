//! Progress events for long-running work.
//!
//! Workers push events into an optional channel. With no observer attached
//! the events are dropped and the worker runs headless.

use std::sync::mpsc;

/// Progress through a batch of items.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Progress {
    pub processed: usize,
    pub total: usize,
    pub current_item: Option<String>,
}

impl Progress {
    pub fn new(processed: usize, total: usize) -> Self {
        Self {
            processed,
            total,
            current_item: None,
        }
    }

    pub fn with_item(mut self, item: impl Into<String>) -> Self {
        self.current_item = Some(item.into());
        self
    }

    /// Progress percentage (0-100).
    pub fn percent(&self) -> u8 {
        if self.total == 0 {
            0
        } else {
            ((self.processed as f64 / self.total as f64) * 100.0).min(100.0) as u8
        }
    }
}

/// Update messages sent from a worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Work has started with this many items selected.
    Started { total: usize },
    Progress(Progress),
    /// Every selected item was handled.
    Completed { succeeded: usize, failed: usize },
    /// Stopped early on request; `processed` items were handled.
    Cancelled { processed: usize },
}

/// Sending half held by a worker. Never blocks and never fails the worker.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressSink {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn headless() -> Self {
        Self { tx: None }
    }

    pub fn is_attached(&self) -> bool {
        self.tx.is_some()
    }

    pub fn send(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching any more.
            let _ = tx.send(event);
        }
    }
}

/// Create a connected sink and receiver.
pub fn channel() -> (ProgressSink, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel();
    (ProgressSink::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percent() {
        assert_eq!(Progress::new(0, 0).percent(), 0);
        assert_eq!(Progress::new(5, 10).percent(), 50);
        assert_eq!(Progress::new(12, 10).percent(), 100);
    }

    #[test]
    fn test_headless_sink_drops_events() {
        let sink = ProgressSink::headless();
        assert!(!sink.is_attached());
        sink.send(ProgressEvent::Started { total: 3 });
    }

    #[test]
    fn test_sink_survives_dropped_receiver() {
        let (sink, rx) = channel();
        sink.send(ProgressEvent::Started { total: 1 });
        assert_eq!(rx.recv().unwrap(), ProgressEvent::Started { total: 1 });

        drop(rx);
        sink.send(ProgressEvent::Cancelled { processed: 0 });
    }
}
