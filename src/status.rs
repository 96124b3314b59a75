//! Status reporting and operation history.
//!
//! The orchestrator reports every phase transition and every user-visible
//! outcome here. The reporter keeps the transient transaction status (which
//! clears itself after a display window on terminal phases), a bounded
//! history log, and an append-only event log it forwards to pluggable sinks.

use std::collections::VecDeque;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::models::{DecryptionRequest, OperationKind, OperationRecord, OperationStatus};
use crate::types::{ChatCipherError, Result};

/// Phase of the transient transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionPhase {
    Pending,
    Success,
    Error,
}

impl TransactionPhase {
    /// Whether the status should clear itself after a window.
    pub fn is_terminal(self) -> bool {
        !matches!(self, TransactionPhase::Pending)
    }
}

/// Transient status shown for the latest user action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionStatus {
    pub visible: bool,
    pub phase: TransactionPhase,
    pub message: String,
}

impl Default for TransactionStatus {
    fn default() -> Self {
        Self {
            visible: false,
            phase: TransactionPhase::Pending,
            message: String::new(),
        }
    }
}

/// What a status event reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StatusDetail {
    /// An operation moved to a new status.
    Transition {
        operation_id: String,
        kind: OperationKind,
        status: OperationStatus,
        message: String,
    },
    /// A notice not tied to one operation.
    Transaction {
        phase: TransactionPhase,
        message: String,
    },
    /// A line was added to the history.
    History { line: String },
    /// A record's clear value was revealed or read back.
    Reveal {
        record_id: String,
        handle: Option<String>,
        clear_value: u32,
        short_circuited: bool,
    },
}

/// A permanent record of something the orchestrator reported.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    /// When the event was reported.
    pub timestamp: DateTime<Utc>,
    /// What happened.
    pub detail: StatusDetail,
}

/// A sink that receives status events. Implement this to forward events
/// to a UI, a file, or a remote collector.
pub trait StatusSink: Send + Sync {
    /// Append an event. Called for every event the reporter records.
    fn append(&mut self, event: StatusEvent);
}

/// Writes status events as JSON lines (one per event) to a file.
pub struct JsonLinesSink {
    file: std::fs::File,
}

impl JsonLinesSink {
    /// Open or create a file for append-only event logging.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|e| ChatCipherError::SinkFailed(e.to_string()))?;
        Ok(Self { file })
    }
}

impl StatusSink for JsonLinesSink {
    fn append(&mut self, event: StatusEvent) {
        match serde_json::to_string(&event) {
            Ok(line) => {
                if let Err(e) = writeln!(self.file, "{line}").and_then(|_| self.file.flush()) {
                    warn!("Failed to write status event: {}", e);
                }
            }
            Err(e) => warn!("Failed to serialize status event: {}", e),
        }
    }
}

/// Newest-first log of completed user actions.
#[derive(Debug, Clone)]
pub struct OperationHistory {
    lines: VecDeque<String>,
    capacity: usize,
}

impl OperationHistory {
    /// Creates a history keeping at most `capacity` lines.
    pub fn new(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepends a line stamped with the local time; drops the oldest beyond capacity.
    pub fn record(&mut self, action: &str) -> String {
        let line = format!("{}: {}", Local::now().format("%H:%M:%S"), action);
        self.lines.push_front(line.clone());
        self.lines.truncate(self.capacity);
        line
    }

    /// Lines, newest first.
    pub fn lines(&self) -> impl Iterator<Item = &String> {
        self.lines.iter()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Default number of events kept in memory.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

type SinkList = Vec<Box<dyn StatusSink>>;

fn lock_sinks(sinks: &Mutex<SinkList>) -> MutexGuard<'_, SinkList> {
    sinks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Consumer of orchestrator events.
pub struct StatusReporter {
    status: Arc<RwLock<TransactionStatus>>,
    generation: Arc<AtomicU64>,
    history: RwLock<OperationHistory>,
    events: RwLock<VecDeque<StatusEvent>>,
    event_capacity: usize,
    sinks: Arc<Mutex<SinkList>>,
    success_window: Duration,
    error_window: Duration,
}

impl StatusReporter {
    /// Creates a reporter with the given display windows and history size.
    pub fn new(success_window: Duration, error_window: Duration, history_capacity: usize) -> Self {
        Self {
            status: Arc::new(RwLock::new(TransactionStatus::default())),
            generation: Arc::new(AtomicU64::new(0)),
            history: RwLock::new(OperationHistory::new(history_capacity)),
            events: RwLock::new(VecDeque::new()),
            event_capacity: DEFAULT_EVENT_CAPACITY,
            sinks: Arc::new(Mutex::new(Vec::new())),
            success_window,
            error_window,
        }
    }

    /// Keeps at most `capacity` events in memory; sinks still see every event.
    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }

    /// Add a sink to receive a copy of every event.
    pub async fn add_sink(&self, sink: Box<dyn StatusSink>) {
        lock_sinks(&self.sinks).push(sink);
    }

    async fn record_event(&self, detail: StatusDetail) {
        let event = StatusEvent {
            timestamp: Utc::now(),
            detail,
        };
        self.forward_to_sinks(&event).await;

        let mut events = self.events.write().await;
        events.push_back(event);
        while events.len() > self.event_capacity {
            events.pop_front();
        }
    }

    /// Sinks may block on I/O, so they run on the blocking pool.
    async fn forward_to_sinks(&self, event: &StatusEvent) {
        let has_sinks = !lock_sinks(&self.sinks).is_empty();
        if !has_sinks {
            return;
        }

        let sinks = Arc::clone(&self.sinks);
        let event = event.clone();
        let forwarded = tokio::task::spawn_blocking(move || {
            for sink in lock_sinks(&sinks).iter_mut() {
                sink.append(event.clone());
            }
        })
        .await;
        if let Err(e) = forwarded {
            warn!("Status sink task failed: {}", e);
        }
    }

    /// Reports an operation's current status. This is the single event
    /// recorded for the transition; the transient status follows it.
    pub async fn transition(&self, operation: &OperationRecord, message: impl Into<String>) {
        let message = message.into();
        let status = operation.status();
        debug!("Operation {} -> {}", operation.id, status);

        let phase = match status {
            OperationStatus::Succeeded => TransactionPhase::Success,
            OperationStatus::Failed => TransactionPhase::Error,
            _ => TransactionPhase::Pending,
        };
        self.display(phase, &message).await;

        self.record_event(StatusDetail::Transition {
            operation_id: operation.id.clone(),
            kind: operation.kind,
            status,
            message,
        })
        .await;
    }

    /// Shows a notice that is not tied to one operation.
    pub async fn show(&self, phase: TransactionPhase, message: impl Into<String>) {
        let message = message.into();
        self.display(phase, &message).await;
        self.record_event(StatusDetail::Transaction { phase, message })
            .await;
    }

    /// Replaces the transient status. Terminal phases clear after their
    /// window unless a newer status replaced them first.
    async fn display(&self, phase: TransactionPhase, message: &str) {
        let generation = {
            let mut status = self.status.write().await;
            *status = TransactionStatus {
                visible: true,
                phase,
                message: message.to_string(),
            };
            self.generation.fetch_add(1, Ordering::SeqCst) + 1
        };

        let window = match phase {
            TransactionPhase::Pending => return,
            TransactionPhase::Success => self.success_window,
            TransactionPhase::Error => self.error_window,
        };

        let status = Arc::clone(&self.status);
        let current = Arc::clone(&self.generation);
        tokio::spawn(async move {
            tokio::time::sleep(window).await;
            let mut status = status.write().await;
            if current.load(Ordering::SeqCst) == generation {
                *status = TransactionStatus::default();
            }
        });
    }

    /// Appends a history line.
    pub async fn record_history(&self, action: &str) {
        let line = self.history.write().await.record(action);
        self.record_event(StatusDetail::History { line }).await;
    }

    /// Records a resolved reveal. Requests without a clear value are ignored.
    pub async fn reveal(&self, request: &DecryptionRequest) {
        let Some(clear_value) = request.result_clear_value else {
            return;
        };
        self.record_event(StatusDetail::Reveal {
            record_id: request.record_id.clone(),
            handle: request.encrypted_handle.map(|h| h.to_string()),
            clear_value,
            short_circuited: request.short_circuited,
        })
        .await;
    }

    /// Current transient status.
    pub async fn current_status(&self) -> TransactionStatus {
        self.status.read().await.clone()
    }

    /// History lines, newest first.
    pub async fn history(&self) -> Vec<String> {
        self.history.read().await.lines().cloned().collect()
    }

    /// Recent events, oldest first.
    pub async fn events(&self) -> Vec<StatusEvent> {
        self.events.read().await.iter().cloned().collect()
    }

    /// Statuses reported for one operation, in order.
    pub async fn transitions_for(&self, operation_id: &str) -> Vec<OperationStatus> {
        self.events
            .read()
            .await
            .iter()
            .filter_map(|event| match &event.detail {
                StatusDetail::Transition {
                    operation_id: id,
                    status,
                    ..
                } if id == operation_id => Some(*status),
                _ => None,
            })
            .collect()
    }
}
