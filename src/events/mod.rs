//! Lifecycle events

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Kinds of task lifecycle events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskEventKind {
    #[serde(rename = "task.created")]
    Created,
    #[serde(rename = "task.started")]
    Started,
    #[serde(rename = "task.completed")]
    Completed,
    #[serde(rename = "task.failed")]
    Failed,
    #[serde(rename = "task.cancelled")]
    Cancelled,
    #[serde(rename = "task.paused")]
    Paused,
    #[serde(rename = "task.resumed")]
    Resumed,
    #[serde(rename = "task.retry")]
    Retry,
}

impl TaskEventKind {
    /// Event name as published to subscribers
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskEventKind::Created => "task.created",
            TaskEventKind::Started => "task.started",
            TaskEventKind::Completed => "task.completed",
            TaskEventKind::Failed => "task.failed",
            TaskEventKind::Cancelled => "task.cancelled",
            TaskEventKind::Paused => "task.paused",
            TaskEventKind::Resumed => "task.resumed",
            TaskEventKind::Retry => "task.retry",
        }
    }
}

impl fmt::Display for TaskEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event for one task
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskEvent {
    /// What happened
    pub kind: TaskEventKind,
    /// Task the event is about
    pub task_id: String,
    /// When the event was emitted
    pub at: DateTime<Utc>,
}

impl TaskEvent {
    /// Create an event for `task_id` stamped now
    pub fn new(kind: TaskEventKind, task_id: impl Into<String>) -> Self {
        Self {
            kind,
            task_id: task_id.into(),
            at: Utc::now(),
        }
    }
}

/// Destination for lifecycle events.
///
/// Emission is fire-and-forget: a sink must not block and never fails the
/// operation that produced the event.
pub trait EventSink: Send + Sync {
    /// Publish one event
    fn emit(&self, event: TaskEvent);
}

/// Sink that logs every event
#[derive(Debug, Default, Clone)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn emit(&self, event: TaskEvent) {
        info!(event = %event.kind, task_id = %event.task_id, "task event");
    }
}

/// Sink that discards every event
#[derive(Debug, Default, Clone)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: TaskEvent) {}
}

/// Sink that fans events out to any number of subscribers
#[derive(Debug, Clone)]
pub struct BroadcastEventSink {
    tx: broadcast::Sender<TaskEvent>,
}

impl BroadcastEventSink {
    /// Create a sink buffering up to `capacity` events per lagging subscriber
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Subscribe to events emitted from now on
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.tx.subscribe()
    }
}

impl Default for BroadcastEventSink {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for BroadcastEventSink {
    fn emit(&self, event: TaskEvent) {
        if self.tx.send(event).is_err() {
            debug!("No event subscribers");
        }
    }
}
