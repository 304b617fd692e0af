use anyhow::Result;
use op_core::ExecutionContext;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, warn};

use crate::phase::{DispatchPhase, DispatchRecord};

/// Event emitted when a request changes phase
#[derive(Clone, Debug)]
pub enum DispatchEvent {
    Started(DispatchRecord),
    PhaseChanged(String, DispatchPhase), // request_id, new phase
    Finished(DispatchRecord),
}

/// Tracks the phase of every in-flight request
#[derive(Clone)]
pub struct DispatchTracker {
    /// In-flight requests by request id
    active: Arc<RwLock<HashMap<String, DispatchRecord>>>,

    /// Finished requests, oldest first
    finished: Arc<RwLock<VecDeque<DispatchRecord>>>,

    /// Maximum history size
    max_history: usize,

    /// Event broadcaster
    event_sender: broadcast::Sender<DispatchEvent>,
}

impl Default for DispatchTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl DispatchTracker {
    pub fn new() -> Self {
        Self::with_history_size(1000)
    }

    /// Create with custom history size
    pub fn with_history_size(max_history: usize) -> Self {
        let (tx, _) = broadcast::channel(1000);
        Self {
            active: Arc::new(RwLock::new(HashMap::new())),
            finished: Arc::new(RwLock::new(VecDeque::new())),
            max_history,
            event_sender: tx,
        }
    }

    /// Subscribe to dispatch events
    pub fn subscribe(&self) -> broadcast::Receiver<DispatchEvent> {
        self.event_sender.subscribe()
    }

    /// Start tracking a request in the RECEIVED phase
    pub async fn begin(&self, ctx: &ExecutionContext) -> String {
        let record = DispatchRecord::new(ctx);
        let request_id = record.request_id.clone();

        let _ = self.event_sender.send(DispatchEvent::Started(record.clone()));
        self.active.write().await.insert(request_id.clone(), record);

        debug!(request_id = %request_id, operation = %ctx.operation, "Tracking request");
        request_id
    }

    /// Move a request forward. Terminal phases retire it into history.
    pub async fn advance(&self, request_id: &str, next: DispatchPhase) -> Result<()> {
        let mut active = self.active.write().await;

        let Some(record) = active.get_mut(request_id) else {
            warn!(request_id = %request_id, "Request not found for phase change");
            return Err(anyhow::anyhow!("Request {} not tracked", request_id));
        };

        if !record.advance(next) {
            return Err(anyhow::anyhow!(
                "Request {} cannot move from {} to {}",
                request_id,
                record.phase,
                next
            ));
        }

        let _ = self
            .event_sender
            .send(DispatchEvent::PhaseChanged(request_id.to_string(), next));
        debug!(request_id = %request_id, phase = %next, "Request phase changed");

        if next.is_terminal() {
            let retired = active.remove(request_id);
            drop(active);
            if let Some(record) = retired {
                let _ = self.event_sender.send(DispatchEvent::Finished(record.clone()));
                let mut finished = self.finished.write().await;
                finished.push_back(record);
                while finished.len() > self.max_history {
                    finished.pop_front();
                }
            }
        }
        Ok(())
    }

    /// Get a tracked request, in flight or finished
    pub async fn get(&self, request_id: &str) -> Option<DispatchRecord> {
        if let Some(record) = self.active.read().await.get(request_id) {
            return Some(record.clone());
        }
        self.finished
            .read()
            .await
            .iter()
            .rev()
            .find(|r| r.request_id == request_id)
            .cloned()
    }

    /// List in-flight requests
    pub async fn list_active(&self) -> Vec<DispatchRecord> {
        self.active.read().await.values().cloned().collect()
    }

    /// List recently finished requests, newest first
    pub async fn list_recent(&self, limit: usize) -> Vec<DispatchRecord> {
        self.finished
            .read()
            .await
            .iter()
            .rev()
            .take(limit)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lifecycle_and_history() {
        let tracker = DispatchTracker::with_history_size(2);
        let mut events = tracker.subscribe();

        for _ in 0..3 {
            let ctx = ExecutionContext::new("alice", "widget.create");
            let id = tracker.begin(&ctx).await;
            tracker.advance(&id, DispatchPhase::ContextBuilt).await.unwrap();
            tracker.advance(&id, DispatchPhase::Completed).await.unwrap();
            assert!(tracker.advance(&id, DispatchPhase::Failed).await.is_err());
        }

        assert!(tracker.list_active().await.is_empty());
        assert_eq!(tracker.list_recent(10).await.len(), 2);
        assert!(matches!(events.recv().await.unwrap(), DispatchEvent::Started(_)));
    }

    #[tokio::test]
    async fn test_rejects_backwards_move() {
        let tracker = DispatchTracker::new();
        let ctx = ExecutionContext::new("alice", "widget.create");
        let id = tracker.begin(&ctx).await;

        tracker.advance(&id, DispatchPhase::PolicyChecked).await.unwrap();
        assert!(tracker.advance(&id, DispatchPhase::ContextBuilt).await.is_err());
        assert_eq!(tracker.get(&id).await.unwrap().phase, DispatchPhase::PolicyChecked);
    }
}
