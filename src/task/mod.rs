/// Task record codec for hash storage
pub mod codec;
/// Handler registry and task execution
pub mod executor;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use uuid::Uuid;

/// Represents a unit of schedulable work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    /// Unique task identifier
    pub id: String,

    /// Task type; selects the handler and names the queue partition
    #[serde(rename = "type")]
    pub task_type: String,

    /// Priority, higher is more urgent
    pub priority: i32,

    /// Current status of the task
    pub status: TaskStatus,

    /// Tasks that must be completed before this one may run
    pub dependencies: Vec<TaskDependency>,

    /// Reserved and caller-defined metadata
    pub metadata: TaskMetadata,

    /// Input consumed by the handler
    pub payload: serde_json::Value,

    /// Output produced by the handler, set once completed
    pub result: Option<serde_json::Value>,

    /// Task creation timestamp
    pub created_at: DateTime<Utc>,

    /// Task last updated timestamp
    pub updated_at: DateTime<Utc>,

    /// Task execution start time
    pub started_at: Option<DateTime<Utc>>,

    /// Task completion time
    pub completed_at: Option<DateTime<Utc>>,
}

/// Reference to a task that must complete first
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDependency {
    /// Id of the task depended upon
    pub task_id: String,
}

impl TaskDependency {
    /// Create a dependency on the given task id
    pub fn new(task_id: impl Into<String>) -> Self {
        Self {
            task_id: task_id.into(),
        }
    }
}

/// Task metadata: reserved keys plus an open extension map.
///
/// Failure detail from the last handler error is kept in `error` and
/// `failed_at`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Number of explicit retries; never decreases
    #[serde(default)]
    pub retry_count: u32,

    /// Deadline used for score bonus
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,

    /// Caller-defined keys
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// Status of a task in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskStatus {
    /// Task is waiting to be processed
    Pending,

    /// Task is currently being processed
    Running,

    /// Task is withheld from workers until resumed
    Paused,

    /// Task completed successfully
    Completed,

    /// Handler failed; may be retried explicitly
    Failed,

    /// Task was cancelled
    Cancelled,
}

impl TaskStatus {
    /// All statuses, in declaration order
    pub const ALL: [TaskStatus; 6] = [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Paused,
        TaskStatus::Completed,
        TaskStatus::Failed,
        TaskStatus::Cancelled,
    ];

    /// Name as stored, e.g. `PENDING`
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Paused => "PAUSED",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Cancelled => "CANCELLED",
        }
    }

    /// Completed and cancelled tasks never change status again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Cancelled)
    }

    /// Whether `self -> next` is an edge of the lifecycle state machine
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        match (self, next) {
            (Pending, Running) => true,
            (Running, Completed) | (Running, Failed) => true,
            (Pending, Paused) | (Running, Paused) => true,
            (Paused, Pending) => true,
            (Failed, Pending) => true,
            (from, Cancelled) => !from.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Task {
    /// Create a new pending task of the given type
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            task_type: task_type.into(),
            priority: 0,
            status: TaskStatus::Pending,
            dependencies: Vec::new(),
            metadata: TaskMetadata::default(),
            payload,
            result: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Set the priority of the task
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the dependencies of the task
    pub fn with_dependencies(mut self, dependencies: Vec<TaskDependency>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Set the metadata of the task
    pub fn with_metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// Move to `next`, rejecting anything that is not a state machine edge
    pub fn transition(&mut self, next: TaskStatus) -> crate::Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(crate::TaskQueueError::InvalidTransition {
                task_id: self.id.clone(),
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Mark task as running
    pub fn mark_running(&mut self) -> crate::Result<()> {
        self.transition(TaskStatus::Running)?;
        self.started_at = Some(self.updated_at);
        Ok(())
    }

    /// Mark task as completed with the handler's output
    pub fn mark_completed(&mut self, result: serde_json::Value) -> crate::Result<()> {
        self.transition(TaskStatus::Completed)?;
        self.completed_at = Some(self.updated_at);
        self.result = Some(result);
        Ok(())
    }

    /// Mark task as failed, recording the error in metadata
    pub fn mark_failed(&mut self, error: String) -> crate::Result<()> {
        self.transition(TaskStatus::Failed)?;
        self.completed_at = Some(self.updated_at);
        self.metadata.error = Some(error);
        self.metadata.failed_at = Some(self.updated_at);
        Ok(())
    }

    /// Put a failed task back to pending, bumping the retry counter
    pub fn mark_retry(&mut self) -> crate::Result<()> {
        self.transition(TaskStatus::Pending)?;
        self.metadata.retry_count += 1;
        self.started_at = None;
        self.completed_at = None;
        Ok(())
    }

    /// Ids of the tasks this task depends on
    pub fn dependency_ids(&self) -> impl Iterator<Item = &str> {
        self.dependencies.iter().map(|d| d.task_id.as_str())
    }

    /// Time spent executing, once both timestamps are known
    pub fn execution_time(&self) -> Option<chrono::Duration> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some(end - start),
            _ => None,
        }
    }
}
