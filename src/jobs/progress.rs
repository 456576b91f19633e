// Worker activity events and the channel that carries them

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use serde::Serialize;

/// Lifecycle phase of one worker slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ThreadPhase {
    Idle,
    Building,
    Analyzing,
    Metadata,
    Tagging,
}

/// Activity payload published by a worker. Observers only; the scheduler
/// never reads these back.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ThreadActivityUpdate {
    pub worker_id: usize,
    pub current_file: Option<PathBuf>,
    pub phase: ThreadPhase,
    pub timestamp: DateTime<Utc>,
}

impl ThreadActivityUpdate {
    pub fn new(worker_id: usize, phase: ThreadPhase) -> Self {
        Self {
            worker_id,
            current_file: None,
            phase,
            timestamp: Utc::now(),
        }
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.current_file = Some(file.into());
        self
    }
}

/// Publishing side of the progress stream.
///
/// Sends never block: a full or disconnected channel drops the update.
#[derive(Debug, Clone, Default)]
pub struct ProgressSink {
    sender: Option<Sender<ThreadActivityUpdate>>,
}

impl ProgressSink {
    /// A sink that discards everything.
    pub fn disabled() -> Self {
        Self { sender: None }
    }

    pub fn is_enabled(&self) -> bool {
        self.sender.is_some()
    }

    pub fn publish(&self, update: ThreadActivityUpdate) {
        let Some(sender) = &self.sender else {
            return;
        };
        match sender.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(update)) => {
                log::trace!("Progress channel full; dropped update for worker {}", update.worker_id);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }
}

/// Bounded progress channel. The receiver is drained by an external observer.
pub fn progress_channel(capacity: usize) -> (ProgressSink, Receiver<ThreadActivityUpdate>) {
    let (tx, rx) = crossbeam_channel::bounded(capacity.max(1));
    (ProgressSink { sender: Some(tx) }, rx)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_channel_drops_instead_of_blocking() {
        let (sink, rx) = progress_channel(1);
        sink.publish(ThreadActivityUpdate::new(0, ThreadPhase::Idle));
        sink.publish(ThreadActivityUpdate::new(0, ThreadPhase::Building).with_file("/hvsc/a.sid"));

        let received: Vec<ThreadActivityUpdate> = rx.try_iter().collect();
        assert_eq!(received.len(), 1);
        assert_eq!(received[0].phase, ThreadPhase::Idle);
    }

    #[test]
    fn test_dropped_receiver_is_ignored() {
        let (sink, rx) = progress_channel(4);
        drop(rx);
        sink.publish(ThreadActivityUpdate::new(1, ThreadPhase::Building));
        assert!(!ProgressSink::disabled().is_enabled());
    }

    #[test]
    fn test_update_serializes_lowercase_phase() {
        let update = ThreadActivityUpdate::new(3, ThreadPhase::Building).with_file("/hvsc/a.sid");
        let json = serde_json::to_value(&update).unwrap();
        assert_eq!(json["workerId"], 3);
        assert_eq!(json["phase"], "building");
        assert_eq!(json["currentFile"], "/hvsc/a.sid");
    }
}
