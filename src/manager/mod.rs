//! Task manager
//!
//! Public facade over queue, scheduler and executor. Every query here is a
//! linear scan over all task records; that is fine for hundreds to a few
//! thousand tasks and is the scalability ceiling of this design.

/// Task filters
pub mod query;

pub use query::TaskQuery;

use crate::config::Config;
use crate::events::{EventSink, TaskEvent, TaskEventKind, TracingEventSink};
use crate::queue::PriorityQueue;
use crate::scheduler::Scheduler;
use crate::storage::memory::MemoryStore;
use crate::storage::Store;
use crate::task::executor::{Executor, TaskHandler, TaskProgress};
use crate::task::{Task, TaskDependency, TaskMetadata, TaskStatus};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::info;

/// Optional settings for [`TaskManager::create_task`]
#[derive(Debug, Clone, Default)]
pub struct CreateTaskOptions {
    /// Priority, higher is more urgent; defaults to 0
    pub priority: i32,
    /// Tasks that must complete first
    pub dependencies: Vec<TaskDependency>,
    /// Reserved and caller-defined metadata
    pub metadata: TaskMetadata,
}

impl CreateTaskOptions {
    /// Set the priority
    pub fn priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add a dependency on `task_id`
    pub fn depends_on(mut self, task_id: impl Into<String>) -> Self {
        self.dependencies.push(TaskDependency::new(task_id));
        self
    }

    /// Set the metadata
    pub fn metadata(mut self, metadata: TaskMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Aggregate counts over every task
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskStats {
    /// Number of tasks
    pub total: usize,
    /// Task count per status; absent statuses are omitted
    pub by_status: HashMap<TaskStatus, usize>,
    /// Task count per type
    pub by_type: HashMap<String, usize>,
    /// Task count per priority
    pub by_priority: HashMap<i32, usize>,
    /// Mean `completedAt - startedAt` of completed tasks, in milliseconds
    pub average_completion_time: f64,
}

/// Creates, queries and controls tasks
pub struct TaskManager {
    queue: Arc<PriorityQueue>,
    scheduler: Scheduler,
    executor: Arc<Executor>,
    events: Arc<dyn EventSink>,
}

impl TaskManager {
    /// Build a manager over `store` using the key prefix and handler timeout
    /// from `config`
    pub fn new(store: Arc<dyn Store>, config: &Config, events: Arc<dyn EventSink>) -> Self {
        let queue = Arc::new(PriorityQueue::new(store, config.key_prefix.clone()));
        let scheduler = Scheduler::new(Arc::clone(&queue));
        let executor = Executor::new(Arc::clone(&queue), scheduler.clone(), Arc::clone(&events))
            .with_timeout(config.handler_timeout());

        Self {
            queue,
            scheduler,
            executor: Arc::new(executor),
            events,
        }
    }

    /// Manager over a fresh [`MemoryStore`] with default config, logging events
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryStore::new()),
            &Config::default(),
            Arc::new(TracingEventSink),
        )
    }

    /// Underlying priority queue
    pub fn queue(&self) -> &Arc<PriorityQueue> {
        &self.queue
    }

    /// Scheduler used for lifecycle control
    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Shared executor, for handing to a worker pool
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Create a pending task and schedule it
    pub async fn create_task(
        &self,
        task_type: impl Into<String>,
        payload: serde_json::Value,
        options: CreateTaskOptions,
    ) -> crate::Result<Task> {
        let task = Task::new(task_type, payload)
            .with_priority(options.priority)
            .with_dependencies(options.dependencies)
            .with_metadata(options.metadata);

        self.scheduler.schedule(&task).await?;
        self.events.emit(TaskEvent::new(TaskEventKind::Created, &task.id));
        info!(
            "Created task {} of type {} with priority {}",
            task.id, task.task_type, task.priority
        );
        Ok(task)
    }

    /// Look up a task by id
    pub async fn get_task(&self, id: &str) -> crate::Result<Option<Task>> {
        self.queue.get_task(id).await
    }

    /// Every task, oldest first
    pub async fn get_all_tasks(&self) -> crate::Result<Vec<Task>> {
        self.queue.get_all_tasks().await
    }

    /// Tasks matching every predicate of `query`
    pub async fn find_tasks(&self, query: &TaskQuery) -> crate::Result<Vec<Task>> {
        let tasks = self.queue.get_all_tasks().await?;
        Ok(tasks.into_iter().filter(|t| query.matches(t)).collect())
    }

    /// Cancel a task. Unknown ids are ignored and yield `None`.
    pub async fn cancel_task(&self, id: &str) -> crate::Result<Option<Task>> {
        let cancelled = self.scheduler.cancel(id).await?;
        if cancelled.is_some() {
            self.events.emit(TaskEvent::new(TaskEventKind::Cancelled, id));
        }
        Ok(cancelled)
    }

    /// Pause a pending or running task
    pub async fn pause_task(&self, id: &str) -> crate::Result<Task> {
        let mut task = self.require(id).await?;
        self.scheduler.pause(&mut task).await?;
        self.events.emit(TaskEvent::new(TaskEventKind::Paused, id));
        Ok(task)
    }

    /// Return a paused task to the queue
    pub async fn resume_task(&self, id: &str) -> crate::Result<Task> {
        let mut task = self.require(id).await?;
        self.scheduler.resume(&mut task).await?;
        self.events.emit(TaskEvent::new(TaskEventKind::Resumed, id));
        Ok(task)
    }

    /// Queue a failed task again, incrementing its retry count
    pub async fn retry_task(&self, id: &str) -> crate::Result<Task> {
        let mut task = self.require(id).await?;
        self.scheduler.retry(&mut task).await?;
        self.events.emit(TaskEvent::new(TaskEventKind::Retry, id));
        Ok(task)
    }

    /// Counts by status, type and priority, plus mean completion time
    pub async fn get_stats(&self) -> crate::Result<TaskStats> {
        let tasks = self.queue.get_all_tasks().await?;
        let mut stats = TaskStats {
            total: tasks.len(),
            ..Default::default()
        };

        let mut completed = 0u32;
        let mut completion_ms = 0f64;

        for task in &tasks {
            *stats.by_status.entry(task.status).or_default() += 1;
            *stats.by_type.entry(task.task_type.clone()).or_default() += 1;
            *stats.by_priority.entry(task.priority).or_default() += 1;

            if task.status == TaskStatus::Completed {
                if let Some(elapsed) = task.execution_time() {
                    completed += 1;
                    completion_ms += elapsed.num_milliseconds() as f64;
                }
            }
        }

        if completed > 0 {
            stats.average_completion_time = completion_ms / f64::from(completed);
        }
        Ok(stats)
    }

    /// Register the handler for `task_type`, replacing any previous one
    pub async fn register_executor(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        self.executor.register_executor(task_type, handler).await;
    }

    /// Register an async closure as the handler for `task_type`
    pub async fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.executor.register_fn(task_type, f).await;
    }

    /// Run the next eligible task; see [`Executor::process_next`]
    pub async fn process_next(&self, task_type: Option<&str>) -> crate::Result<Option<Task>> {
        self.executor.process_next(task_type).await
    }

    /// Record progress for `id`, clamped to `[0, 100]`
    pub async fn update_task_progress(
        &self,
        id: &str,
        progress: f64,
        metadata: Option<serde_json::Value>,
    ) -> crate::Result<TaskProgress> {
        self.executor
            .update_task_progress(id, progress, metadata)
            .await
    }

    /// Last recorded progress for `id`
    pub async fn get_task_progress(&self, id: &str) -> crate::Result<Option<TaskProgress>> {
        self.executor.get_task_progress(id).await
    }

    async fn require(&self, id: &str) -> crate::Result<Task> {
        self.queue
            .get_task(id)
            .await?
            .ok_or_else(|| crate::TaskQueueError::TaskNotFound(id.to_string()))
    }
}
