//! Tracker for create-or-message operations.
//!
//! Keeps a snapshot of every operation the orchestrator started so callers
//! can inspect in-flight and terminal operations. The orchestrator task
//! that created an operation is the only writer of its snapshot.

use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::models::{OperationRecord, OperationStatus};
use crate::types::{ChatCipherError, Result};

/// Default number of operations kept before terminal ones are evicted.
pub const DEFAULT_MAX_TRACKED: usize = 100;

/// Snapshot store of operation records.
pub struct OperationTracker {
    records: Arc<RwLock<VecDeque<OperationRecord>>>,
    max_tracked: usize,
}

impl OperationTracker {
    /// Creates a tracker keeping up to `max_tracked` operations.
    pub fn new(max_tracked: usize) -> Self {
        Self {
            records: Arc::new(RwLock::new(VecDeque::new())),
            max_tracked,
        }
    }

    /// Creates a tracker with the default capacity.
    pub fn with_defaults() -> Self {
        Self::new(DEFAULT_MAX_TRACKED)
    }

    /// Starts tracking a new operation.
    pub async fn track(&self, record: &OperationRecord) {
        let mut records = self.records.write().await;

        if records.len() >= self.max_tracked {
            // Evict the oldest terminal operation; in-flight ones are never dropped.
            if let Some(pos) = records.iter().position(|r| r.is_terminal()) {
                records.remove(pos);
            }
        }

        records.push_back(record.clone());
    }

    /// Replaces the snapshot of a tracked operation.
    pub async fn update(&self, record: &OperationRecord) -> Result<()> {
        let mut records = self.records.write().await;

        if let Some(existing) = records.iter_mut().find(|r| r.id == record.id) {
            if existing.is_terminal() {
                return Err(ChatCipherError::InvalidTransition {
                    from: existing.status().to_string(),
                    to: record.status().to_string(),
                });
            }
            *existing = record.clone();
            Ok(())
        } else {
            Err(ChatCipherError::OperationNotFound(record.id.clone()))
        }
    }

    /// Returns a tracked operation.
    pub async fn get(&self, id: &str) -> Option<OperationRecord> {
        let records = self.records.read().await;
        records.iter().find(|r| r.id == id).cloned()
    }

    /// Returns operations that have not reached a terminal status.
    pub async fn in_flight(&self) -> Vec<OperationRecord> {
        let records = self.records.read().await;
        records.iter().filter(|r| !r.is_terminal()).cloned().collect()
    }

    /// Returns failed operations.
    pub async fn failed(&self) -> Vec<OperationRecord> {
        let records = self.records.read().await;
        records
            .iter()
            .filter(|r| r.status() == OperationStatus::Failed)
            .cloned()
            .collect()
    }

    /// Returns the number of operations with the given status.
    pub async fn count(&self, status: OperationStatus) -> usize {
        let records = self.records.read().await;
        records.iter().filter(|r| r.status() == status).count()
    }

    /// Removes all terminal operations.
    pub async fn prune_terminal(&self) {
        let mut records = self.records.write().await;
        records.retain(|r| !r.is_terminal());
    }

    /// Returns the number of tracked operations.
    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    /// Returns true if nothing is tracked.
    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for OperationTracker {
    fn default() -> Self {
        Self::with_defaults()
    }
}
