//! Fan-out of execution log entries to storage and live subscribers.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::core::store::RunStore;
use crate::model::WorkflowLogEntry;

/// Push side of live log streaming. Delivery is best-effort; a slow or
/// dropped subscriber never blocks run execution.
pub trait LogBroadcaster: Send + Sync {
    fn broadcast(&self, entry: &WorkflowLogEntry);
}

pub struct NoopBroadcaster;

impl LogBroadcaster for NoopBroadcaster {
    fn broadcast(&self, _entry: &WorkflowLogEntry) {}
}

/// Broadcaster backed by unbounded channels, one per subscriber.
/// Subscribers that dropped their receiver are pruned on the next send.
#[derive(Default)]
pub struct ChannelBroadcaster {
    subscribers: Mutex<Vec<mpsc::UnboundedSender<WorkflowLogEntry>>>,
}

impl ChannelBroadcaster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<WorkflowLogEntry> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }
}

impl LogBroadcaster for ChannelBroadcaster {
    fn broadcast(&self, entry: &WorkflowLogEntry) {
        self.subscribers
            .lock()
            .retain(|tx| tx.send(entry.clone()).is_ok());
    }
}

/// Writes each entry to the store, then notifies live subscribers. A
/// storage failure is reported through `tracing` and does not interrupt
/// the run.
#[derive(Clone)]
pub struct LogSink {
    store: Arc<dyn RunStore>,
    broadcaster: Arc<dyn LogBroadcaster>,
}

impl LogSink {
    pub fn new(store: Arc<dyn RunStore>, broadcaster: Arc<dyn LogBroadcaster>) -> Self {
        LogSink { store, broadcaster }
    }

    pub async fn append(&self, entry: WorkflowLogEntry) {
        if let Err(e) = self.store.append_log(&entry).await {
            tracing::warn!(run_id = %entry.run_id, error = %e, "failed to persist log entry");
        }
        self.broadcaster.broadcast(&entry);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    use crate::core::store::MemoryRunStore;

    fn entry(message: &str) -> WorkflowLogEntry {
        WorkflowLogEntry {
            timestamp: Utc::now(),
            run_id: "r1".to_string(),
            branch: 0,
            node_id: None,
            node_type: None,
            message: message.to_string(),
            data: None,
            debug: false,
        }
    }

    #[tokio::test]
    async fn test_append_persists_and_broadcasts() {
        let store = Arc::new(MemoryRunStore::new());
        let broadcaster = Arc::new(ChannelBroadcaster::new());
        let mut rx = broadcaster.subscribe();
        let sink = LogSink::new(store.clone(), broadcaster);

        sink.append(entry("hello")).await;

        assert_eq!(store.get_logs("r1").await.unwrap().len(), 1);
        assert_eq!(rx.recv().await.unwrap().message, "hello");
    }

    #[tokio::test]
    async fn test_dropped_subscriber_is_pruned() {
        let broadcaster = ChannelBroadcaster::new();
        let rx = broadcaster.subscribe();
        drop(rx);

        broadcaster.broadcast(&entry("x"));
        assert!(broadcaster.subscribers.lock().is_empty());
    }
}
