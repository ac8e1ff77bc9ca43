//! Coarse-grained progress events.
//!
//! The resolver and downloader report what they are doing through a
//! [`ProgressSink`]. Sinks only observe; nothing they do feeds back into
//! control flow.

use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;

/// One progress notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// A resolver layer is about to be processed.
    LayerStarted { depth: u32, targets: usize },
    /// A resolver layer finished; `planned` is the plan size so far.
    LayerFinished { depth: u32, planned: usize },
    /// The download batch is starting.
    DownloadStarted { total: usize },
    /// One download finished, successfully or not.
    ItemCompleted {
        name: String,
        version: String,
        ok: bool,
        completed: usize,
        total: usize,
    },
}

/// Receiver of progress events.
pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn emit(&self, _event: ProgressEvent) {}
}

impl ProgressSink for UnboundedSender<ProgressEvent> {
    fn emit(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening.
        let _ = self.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn test_channel_sink() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.emit(ProgressEvent::DownloadStarted { total: 3 });
        assert_eq!(rx.try_recv().unwrap(), ProgressEvent::DownloadStarted { total: 3 });
    }

    #[test]
    fn test_closed_channel_is_ignored() {
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        tx.emit(ProgressEvent::LayerStarted { depth: 0, targets: 1 });
    }

    #[test]
    fn test_event_json_shape() {
        let json = serde_json::to_value(ProgressEvent::LayerFinished { depth: 2, planned: 7 }).unwrap();
        assert_eq!(json["event"], "layer_finished");
        assert_eq!(json["depth"], 2);
        assert_eq!(json["planned"], 7);
    }
}
