//! Status callbacks for whoever renders pipeline progress.

use serde::Serialize;
use tokio::sync::mpsc;

/// One status update from a running request
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProgressEvent {
    ItemStarted {
        index: usize,
        total: usize,
        title: String,
    },
    Downloading {
        title: String,
        bytes: u64,
        total: Option<u64>,
    },
    Transcoding {
        title: String,
        percent: f32,
    },
    ItemFinished {
        title: String,
        ok: bool,
    },
}

/// Cheap, cloneable handle that forwards events if anyone listens.
///
/// Sends never block and never fail the pipeline: a full or closed channel
/// simply drops the update.
#[derive(Debug, Clone, Default)]
pub struct ProgressReporter {
    tx: Option<mpsc::Sender<ProgressEvent>>,
}

impl ProgressReporter {
    pub fn new(tx: mpsc::Sender<ProgressEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// A reporter that discards everything
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: ProgressEvent) {
        if let Some(tx) = &self.tx {
            let _ = tx.try_send(event);
        }
    }

    pub fn item_started(&self, index: usize, total: usize, title: &str) {
        self.emit(ProgressEvent::ItemStarted {
            index,
            total,
            title: title.to_string(),
        });
    }

    pub fn downloading(&self, title: &str, bytes: u64, total: Option<u64>) {
        self.emit(ProgressEvent::Downloading {
            title: title.to_string(),
            bytes,
            total,
        });
    }

    pub fn transcoding(&self, title: &str, percent: f32) {
        self.emit(ProgressEvent::Transcoding {
            title: title.to_string(),
            percent,
        });
    }

    pub fn item_finished(&self, title: &str, ok: bool) {
        self.emit(ProgressEvent::ItemFinished {
            title: title.to_string(),
            ok,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_reporter_forwards_and_never_blocks() {
        let (tx, mut rx) = mpsc::channel(1);
        let reporter = ProgressReporter::new(tx);

        reporter.item_started(0, 2, "A");
        // Channel is full: this update is dropped instead of waiting.
        reporter.transcoding("A", 50.0);

        assert_eq!(
            rx.recv().await,
            Some(ProgressEvent::ItemStarted {
                index: 0,
                total: 2,
                title: "A".into()
            })
        );
        assert!(rx.try_recv().is_err());

        drop(rx);
        reporter.item_finished("A", true);
        ProgressReporter::disabled().item_finished("B", false);
    }
}
