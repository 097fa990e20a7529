/// Worker pool implementation
pub mod pool;

use crate::task::executor::Executor;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::TryRecvError;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info};

/// A worker that pulls tasks through an executor until told to stop
pub struct Worker {
    id: usize,
    executor: Arc<Executor>,
    task_type: Option<String>,
    poll_interval: Duration,
}

impl Worker {
    /// Create a worker polling every task type
    pub fn new(id: usize, executor: Arc<Executor>) -> Self {
        Self {
            id,
            executor,
            task_type: None,
            poll_interval: Duration::from_millis(100),
        }
    }

    /// Only take tasks of `task_type`
    pub fn with_task_type(mut self, task_type: Option<String>) -> Self {
        self.task_type = task_type;
        self
    }

    /// Wait this long between polls of an empty queue
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Process tasks until a shutdown signal arrives.
    ///
    /// The signal is checked between tasks, so a running handler always
    /// finishes and has its outcome persisted.
    pub async fn run_with_shutdown(&self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Worker {} started", self.id);

        loop {
            if !matches!(shutdown_rx.try_recv(), Err(TryRecvError::Empty)) {
                break;
            }

            match self.executor.process_next(self.task_type.as_deref()).await {
                Ok(Some(task)) => {
                    info!(
                        "Worker {} finished task {} with status {}",
                        self.id, task.id, task.status
                    );
                    continue;
                }
                Ok(None) => {
                    debug!("Worker {} found nothing to run", self.id);
                }
                Err(e) => {
                    error!("Worker {} failed to process task: {}", self.id, e);
                }
            }

            tokio::select! {
                _ = shutdown_rx.recv() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        info!("Worker {} stopped", self.id);
    }
}
