//! Scheduler

use crate::queue::PriorityQueue;
use crate::task::{Task, TaskStatus};
use std::sync::Arc;
use tracing::{debug, info};

/// Decides when a task is visible to workers.
///
/// The scheduler does not look at dependencies: an ineligible task may be
/// queued and popped, and it is up to the executor to put it back.
#[derive(Clone)]
pub struct Scheduler {
    queue: Arc<PriorityQueue>,
}

impl Scheduler {
    /// Create a scheduler over `queue`
    pub fn new(queue: Arc<PriorityQueue>) -> Self {
        Self { queue }
    }

    /// Make a task available to workers, scored by its current priority
    pub async fn schedule(&self, task: &Task) -> crate::Result<()> {
        let score = self.queue.enqueue(task, None).await?;
        debug!("Scheduled task {} ({}) at {}", task.id, task.task_type, score);
        Ok(())
    }

    /// Put back a task that was popped but could not run yet.
    ///
    /// The record is re-read first and left untouched: a task cancelled,
    /// paused or removed since the pop stays out of the queue. Returns
    /// whether the task was queued again.
    pub async fn reschedule(&self, task: &Task) -> crate::Result<bool> {
        match self.queue.get_task(&task.id).await? {
            Some(current) if current.status == TaskStatus::Pending => {
                self.queue.requeue(&current).await?;
                debug!("Rescheduled task {}", task.id);
                Ok(true)
            }
            Some(current) => {
                debug!(
                    "Not rescheduling task {}, now {}",
                    current.id, current.status
                );
                Ok(false)
            }
            None => {
                debug!("Not rescheduling task {}, record is gone", task.id);
                Ok(false)
            }
        }
    }

    /// Withdraw a task from its queue and mark it cancelled.
    ///
    /// Unknown ids are tolerated and yield `None`; cancelling an already
    /// cancelled task changes nothing. A running handler is not interrupted.
    pub async fn cancel(&self, id: &str) -> crate::Result<Option<Task>> {
        let Some(mut task) = self.queue.get_task(id).await? else {
            debug!("Cancel requested for unknown task {}", id);
            return Ok(None);
        };

        if task.status == TaskStatus::Cancelled {
            return Ok(Some(task));
        }

        task.transition(TaskStatus::Cancelled)?;
        self.queue.withdraw(&task).await?;
        self.queue.update(&task).await?;
        info!("Task {} cancelled", id);
        Ok(Some(task))
    }

    /// Withdraw a task from its queue and mark it paused.
    ///
    /// Pausing a running task only changes its label; the handler keeps
    /// running.
    pub async fn pause(&self, task: &mut Task) -> crate::Result<()> {
        task.transition(TaskStatus::Paused)?;
        self.queue.withdraw(task).await?;
        self.queue.update(task).await?;
        info!("Task {} paused", task.id);
        Ok(())
    }

    /// Return a paused task to pending and queue it again
    pub async fn resume(&self, task: &mut Task) -> crate::Result<()> {
        if task.status != TaskStatus::Paused {
            return Err(crate::TaskQueueError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        task.transition(TaskStatus::Pending)?;
        self.schedule(task).await?;
        info!("Task {} resumed", task.id);
        Ok(())
    }

    /// Return a failed task to pending, bump its retry count and queue it again
    pub async fn retry(&self, task: &mut Task) -> crate::Result<()> {
        if task.status != TaskStatus::Failed {
            return Err(crate::TaskQueueError::InvalidTransition {
                task_id: task.id.clone(),
                from: task.status,
                to: TaskStatus::Pending,
            });
        }
        task.mark_retry()?;
        self.schedule(task).await?;
        info!(
            "Task {} queued for retry {}",
            task.id, task.metadata.retry_count
        );
        Ok(())
    }
}
