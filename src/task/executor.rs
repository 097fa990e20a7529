//! Executor

use crate::events::{EventSink, TaskEvent, TaskEventKind};
use crate::queue::PriorityQueue;
use crate::scheduler::Scheduler;
use crate::task::{Task, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Business logic for one task type.
///
/// The returned value becomes the task's `result`; an error marks the task
/// failed. Delivery is at-least-once, so handlers should be idempotent.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value>;
}

/// Adapts an async closure to [`TaskHandler`]
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> TaskHandler for FnHandler<F>
where
    F: Fn(Task) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
{
    async fn handle(&self, task: &Task) -> anyhow::Result<serde_json::Value> {
        (self.0)(task.clone()).await
    }
}

/// Progress side channel for UI polling; independent of task status
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskProgress {
    /// Task the progress belongs to
    pub task_id: String,
    /// Percentage in `[0, 100]`
    pub progress: f64,
    /// Free-form detail supplied by the reporter
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    /// When the progress was recorded
    pub updated_at: DateTime<Utc>,
}

/// Outcome of scanning the queue for a runnable task
enum Pick {
    /// Claimed and marked running
    Ready(Arc<dyn TaskHandler>, Task),
    /// Nothing ran; at least one task of this type had no handler
    MissingHandler(String),
    Nothing,
}

/// Runs tasks through the handler registered for their type
pub struct Executor {
    queue: Arc<PriorityQueue>,
    scheduler: Scheduler,
    handlers: RwLock<HashMap<String, Arc<dyn TaskHandler>>>,
    events: Arc<dyn EventSink>,
    handler_timeout: Option<Duration>,
}

impl Executor {
    /// Create an executor with no handlers and no handler timeout
    pub fn new(
        queue: Arc<PriorityQueue>,
        scheduler: Scheduler,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            queue,
            scheduler,
            handlers: RwLock::new(HashMap::new()),
            events,
            handler_timeout: None,
        }
    }

    /// Fail handlers that run longer than `handler_timeout`
    pub fn with_timeout(mut self, handler_timeout: Option<Duration>) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    /// Register the handler for `task_type`, replacing any previous one
    pub async fn register_executor(
        &self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) {
        let task_type = task_type.into();
        let mut handlers = self.handlers.write().await;
        if handlers.insert(task_type.clone(), handler).is_some() {
            warn!("Replaced handler for task type {}", task_type);
        } else {
            info!("Registered handler for task type {}", task_type);
        }
    }

    /// Register an async closure as the handler for `task_type`
    pub async fn register_fn<F, Fut>(&self, task_type: impl Into<String>, f: F)
    where
        F: Fn(Task) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<serde_json::Value>> + Send + 'static,
    {
        self.register_executor(task_type, Arc::new(FnHandler(f)))
            .await;
    }

    /// Drop the handler for `task_type`; returns whether one was registered
    pub async fn unregister_executor(&self, task_type: &str) -> bool {
        self.handlers.write().await.remove(task_type).is_some()
    }

    /// Whether a handler is registered for `task_type`
    pub async fn has_executor(&self, task_type: &str) -> bool {
        self.handlers.read().await.contains_key(task_type)
    }

    /// Task types with a registered handler
    pub async fn registered_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.read().await.keys().cloned().collect();
        types.sort();
        types
    }

    /// Ids of dependencies of `task` that are not completed (or not found)
    pub async fn unmet_dependencies(&self, task: &Task) -> crate::Result<Vec<String>> {
        let mut unmet = Vec::new();
        for dep in task.dependency_ids() {
            let done = matches!(
                self.queue.get_task(dep).await?,
                Some(ref t) if t.status == TaskStatus::Completed
            );
            if !done {
                unmet.push(dep.to_string());
            }
        }
        Ok(unmet)
    }

    /// Pop tasks of `task_type` (or of any type) until one can run, and run it.
    ///
    /// Popped tasks that cannot run yet (dependencies not all completed, or
    /// no handler registered) are set aside and put back once the scan ends,
    /// so a blocked task never hides the eligible ones behind it. Tasks that
    /// are no longer pending are dropped from the queue. The scan looks at
    /// most at as many tasks as were queued when it began.
    ///
    /// Returns the finished task, or `None` when nothing ran. If nothing ran
    /// and a task was set aside for lack of a handler, `NoHandler` is
    /// returned instead.
    pub async fn process_next(&self, task_type: Option<&str>) -> crate::Result<Option<Task>> {
        let mut deferred = Vec::new();
        let picked = self.pick(task_type, &mut deferred).await;

        if let Err(e) = self.put_back(&deferred).await {
            error!("Failed to put back {} deferred tasks: {}", deferred.len(), e);
            if !matches!(picked, Ok(Pick::Ready(..))) {
                return Err(e);
            }
        }

        match picked? {
            Pick::Ready(handler, task) => self.run(handler, task).await.map(Some),
            Pick::MissingHandler(task_type) => Err(crate::TaskQueueError::NoHandler(task_type)),
            Pick::Nothing => Ok(None),
        }
    }

    /// Run `task` through its handler and persist the outcome.
    ///
    /// The stored record is re-read first; if it is no longer pending the
    /// handler is not called and the stored task is returned unchanged.
    /// Handler failure is recorded on the task, not returned as an error. If
    /// the task was cancelled, paused or removed while the handler ran, the
    /// handler's outcome is discarded.
    pub async fn execute(&self, task: Task) -> crate::Result<Task> {
        let handler = self
            .handler_for(&task.task_type)
            .await
            .ok_or_else(|| crate::TaskQueueError::NoHandler(task.task_type.clone()))?;

        let id = task.id.clone();
        match self.claim(task).await? {
            Some(running) => self.run(handler, running).await,
            None => self
                .queue
                .get_task(&id)
                .await?
                .ok_or(crate::TaskQueueError::TaskNotFound(id)),
        }
    }

    async fn handler_for(&self, task_type: &str) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.read().await.get(task_type).cloned()
    }

    /// Scan the queue for the best task that can run now and claim it
    async fn pick(
        &self,
        task_type: Option<&str>,
        deferred: &mut Vec<Task>,
    ) -> crate::Result<Pick> {
        let budget = self.queue.get_length(task_type).await?.max(1);
        let mut missing_handler = None;

        for _ in 0..budget {
            let Some(task) = self.queue.dequeue(task_type).await? else {
                break;
            };

            if task.status != TaskStatus::Pending {
                debug!("Dropping task {} in status {}", task.id, task.status);
                continue;
            }

            let unmet = self.unmet_dependencies(&task).await?;
            if !unmet.is_empty() {
                debug!("Task {} waiting on {:?}", task.id, unmet);
                deferred.push(task);
                continue;
            }

            let Some(handler) = self.handler_for(&task.task_type).await else {
                warn!("No handler for task {} of type {}", task.id, task.task_type);
                if missing_handler.is_none() {
                    missing_handler = Some(task.task_type.clone());
                }
                deferred.push(task);
                continue;
            };

            if let Some(running) = self.claim(task).await? {
                return Ok(Pick::Ready(handler, running));
            }
        }

        Ok(match missing_handler {
            Some(task_type) => Pick::MissingHandler(task_type),
            None => Pick::Nothing,
        })
    }

    async fn put_back(&self, deferred: &[Task]) -> crate::Result<()> {
        for task in deferred {
            self.scheduler.reschedule(task).await?;
        }
        Ok(())
    }

    /// Mark the stored task running, unless it stopped being pending.
    ///
    /// Works from a fresh read of the record so that a cancel or pause
    /// issued after the pop is not overwritten. A task with no record is
    /// run as given.
    async fn claim(&self, task: Task) -> crate::Result<Option<Task>> {
        let mut task = match self.queue.get_task(&task.id).await? {
            Some(current) if current.status != TaskStatus::Pending => {
                info!(
                    "Task {} became {} before it started, skipping",
                    current.id, current.status
                );
                return Ok(None);
            }
            Some(current) => current,
            None => task,
        };

        task.mark_running()?;
        self.queue.update(&task).await?;
        self.events.emit(TaskEvent::new(TaskEventKind::Started, &task.id));
        info!("Processing task {} of type {}", task.id, task.task_type);
        Ok(Some(task))
    }

    async fn run(&self, handler: Arc<dyn TaskHandler>, mut task: Task) -> crate::Result<Task> {
        let outcome = match self.handler_timeout {
            Some(limit) => match timeout(limit, handler.handle(&task)).await {
                Ok(outcome) => outcome,
                Err(_) => Err(anyhow::anyhow!("handler timed out after {:?}", limit)),
            },
            None => handler.handle(&task).await,
        };

        match self.queue.get_task(&task.id).await? {
            None => {
                warn!("Task {} was removed while running, discarding outcome", task.id);
                return Ok(task);
            }
            Some(current) if current.status != TaskStatus::Running => {
                info!(
                    "Task {} became {} while running, discarding outcome",
                    current.id, current.status
                );
                return Ok(current);
            }
            Some(_) => {}
        }

        match outcome {
            Ok(result) => {
                task.mark_completed(result)?;
                self.queue.update(&task).await?;
                self.events
                    .emit(TaskEvent::new(TaskEventKind::Completed, &task.id));
                info!("Task {} completed successfully", task.id);
            }
            Err(e) => {
                let error_msg = format!("{e:#}");
                error!("Task {} failed: {}", task.id, error_msg);
                task.mark_failed(error_msg)?;
                self.queue.update(&task).await?;
                self.events.emit(TaskEvent::new(TaskEventKind::Failed, &task.id));
            }
        }

        Ok(task)
    }

    /// Record progress for `id`, clamped to `[0, 100]`
    pub async fn update_task_progress(
        &self,
        id: &str,
        progress: f64,
        metadata: Option<serde_json::Value>,
    ) -> crate::Result<TaskProgress> {
        let progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
        let entry = TaskProgress {
            task_id: id.to_string(),
            progress,
            metadata,
            updated_at: Utc::now(),
        };
        let raw = serde_json::to_string(&entry)?;
        self.queue
            .store()
            .set(&self.queue.progress_key(id), &raw)
            .await?;
        Ok(entry)
    }

    /// Last recorded progress for `id`
    pub async fn get_task_progress(&self, id: &str) -> crate::Result<Option<TaskProgress>> {
        let raw = self.queue.store().get(&self.queue.progress_key(id)).await?;
        match raw {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}
