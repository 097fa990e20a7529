//! Fuse Task Queue - a store-backed priority task queue with scheduling,
//! dependency gating and pluggable task handlers
//!
//! The queue keeps no authoritative state in process: every task record and
//! every per-type ordering lives in a [`storage::Store`] (Redis in production,
//! [`storage::memory::MemoryStore`] for tests and single-process use), so any
//! number of replicas can share one set of queues.

/// Configuration management for the task queue system
pub mod config;
/// Lifecycle event emission
pub mod events;
/// Public task management facade
pub mod manager;
/// Score-ordered, per-type task queues
pub mod queue;
/// Eligibility control: schedule, cancel, pause, resume
pub mod scheduler;
/// Key-value and sorted-set store adapters
pub mod storage;
/// Task definitions, record codec and execution logic
pub mod task;
/// Worker pool and worker management
pub mod worker;

pub use config::Config;
pub use events::{BroadcastEventSink, EventSink, TaskEvent, TaskEventKind, TracingEventSink};
pub use manager::{CreateTaskOptions, TaskManager, TaskQuery, TaskStats};
pub use queue::PriorityQueue;
pub use scheduler::Scheduler;
pub use storage::memory::MemoryStore;
pub use storage::Store;
pub use task::executor::{Executor, TaskHandler, TaskProgress};
pub use task::{Task, TaskDependency, TaskMetadata, TaskStatus};
pub use worker::pool::WorkerPool;

use thiserror::Error;

/// Result type for task queue operations
pub type Result<T> = std::result::Result<T, TaskQueueError>;

/// Error types for the task queue system
#[derive(Error, Debug)]
pub enum TaskQueueError {
    /// Queue is empty, no tasks available
    #[error("Queue is empty")]
    QueueEmpty,

    /// Task with the specified ID was not found
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    /// Requested status change is not an edge of the task state machine
    #[error("Invalid transition for task {task_id}: {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: TaskStatus,
        to: TaskStatus,
    },

    /// Task execution failed with an error
    #[error("Task execution failed: {0}")]
    ExecutionFailed(String),

    /// No handler is registered for the task type
    #[error("No handler registered for task type: {0}")]
    NoHandler(String),

    /// Storage backend error occurred
    #[error("Storage error: {0}")]
    StorageError(String),

    /// Stored task record could not be decoded
    #[error("Codec error: {0}")]
    CodecError(String),

    /// JSON serialization/deserialization error
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Worker pool encountered an error
    #[error("Worker pool error: {0}")]
    WorkerPoolError(String),

    /// Configuration validation error
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Unknown or unclassified error
    #[error("Unknown error: {0}")]
    Unknown(String),
}
