//! Store-backed priority queue

/// Score computation
pub mod score;

use crate::storage::Store;
use crate::task::codec::{decode_task, encode_task};
use crate::task::{Task, TaskStatus};
use std::cmp::Ordering;
use std::sync::Arc;
use tracing::{debug, warn};

/// Per-type priority queues plus a by-id record table, all held in a [`Store`].
///
/// Each task type has a sorted set of task ids keyed by score; the full
/// record of every task lives in a hash at `{prefix}:record:{id}`. Popping
/// an id leaves its record in place so the task stays queryable.
#[derive(Clone)]
pub struct PriorityQueue {
    store: Arc<dyn Store>,
    prefix: String,
}

impl PriorityQueue {
    /// Create a queue over `store`, namespacing every key under `prefix`
    pub fn new(store: Arc<dyn Store>, prefix: impl Into<String>) -> Self {
        Self {
            store,
            prefix: prefix.into(),
        }
    }

    /// The underlying store
    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Key of the sorted set for `task_type`
    pub fn queue_key(&self, task_type: &str) -> String {
        format!("{}:queue:{}", self.prefix, task_type)
    }

    /// Key of the record hash for task `id`
    pub fn record_key(&self, id: &str) -> String {
        format!("{}:record:{}", self.prefix, id)
    }

    /// Key of the progress entry for task `id`
    pub fn progress_key(&self, id: &str) -> String {
        format!("{}:progress:{}", self.prefix, id)
    }

    /// Write the task record and (re)insert it into its type's queue.
    ///
    /// Re-enqueueing an already queued task just refreshes its score.
    /// Returns the score used.
    pub async fn enqueue(&self, task: &Task, priority_override: Option<i32>) -> crate::Result<f64> {
        let priority = priority_override.unwrap_or(task.priority);
        let score = score::compute_score(task, priority);

        self.update(task).await?;
        self.store
            .zadd(&self.queue_key(&task.task_type), &task.id, score)
            .await?;

        debug!(
            "Task {} enqueued on {} with score {}",
            task.id, task.task_type, score
        );
        Ok(score)
    }

    /// Put `task` back into its type's queue without writing its record.
    ///
    /// Used for tasks that were popped but could not run; the record may
    /// have been changed by another replica since the pop and must not be
    /// overwritten with the popped copy.
    pub async fn requeue(&self, task: &Task) -> crate::Result<f64> {
        let score = score::compute_score(task, task.priority);
        self.store
            .zadd(&self.queue_key(&task.task_type), &task.id, score)
            .await?;
        debug!("Task {} requeued with score {}", task.id, score);
        Ok(score)
    }

    /// Pop the highest-scored task of `task_type`, or across every type when
    /// `None`.
    ///
    /// The status of the returned task is not changed. If the popped id has
    /// no record (deleted concurrently) this yields `None`.
    pub async fn dequeue(&self, task_type: Option<&str>) -> crate::Result<Option<Task>> {
        let popped = match task_type {
            Some(task_type) => self.store.zpopmax(&self.queue_key(task_type)).await?,
            None => self.pop_any().await?,
        };

        let Some((id, score)) = popped else {
            return Ok(None);
        };

        match self.get_task(&id).await? {
            Some(task) => {
                debug!("Task {} dequeued with score {}", id, score);
                Ok(Some(task))
            }
            None => {
                warn!("Dequeued task {} has no record", id);
                Ok(None)
            }
        }
    }

    /// Like [`dequeue`](Self::dequeue) but leaves the queue untouched
    pub async fn peek(&self, task_type: Option<&str>) -> crate::Result<Option<Task>> {
        let top = match task_type {
            Some(task_type) => self.top_of(&self.queue_key(task_type)).await?,
            None => self.heads().await?.into_iter().next().map(|(_, id, _)| id),
        };

        match top {
            Some(id) => self.get_task(&id).await,
            None => Ok(None),
        }
    }

    /// Remove a task from its queue and delete its record.
    ///
    /// Returns `false` when no record exists.
    pub async fn remove(&self, id: &str) -> crate::Result<bool> {
        let Some(task) = self.get_task(id).await? else {
            return Ok(false);
        };

        self.store
            .zrem(&self.queue_key(&task.task_type), id)
            .await?;
        self.store.del(&self.record_key(id)).await?;
        debug!("Task {} removed", id);
        Ok(true)
    }

    /// Take a task out of its type's queue, keeping its record.
    ///
    /// Returns whether the task was queued.
    pub async fn withdraw(&self, task: &Task) -> crate::Result<bool> {
        self.store
            .zrem(&self.queue_key(&task.task_type), &task.id)
            .await
    }

    /// Overwrite the task record; queue membership and score are unchanged
    pub async fn update(&self, task: &Task) -> crate::Result<()> {
        let fields = encode_task(task)?;
        self.store.hset(&self.record_key(&task.id), &fields).await
    }

    /// Look up a task by id
    pub async fn get_task(&self, id: &str) -> crate::Result<Option<Task>> {
        let fields = self.store.hgetall(&self.record_key(id)).await?;
        if fields.is_empty() {
            return Ok(None);
        }
        decode_task(&fields).map(Some)
    }

    /// Every task record, oldest first. Full scan over the record keys.
    pub async fn get_all_tasks(&self) -> crate::Result<Vec<Task>> {
        let pattern = format!("{}:record:*", self.prefix);
        let keys = self.store.keys(&pattern).await?;

        let mut tasks = Vec::with_capacity(keys.len());
        for key in keys {
            let fields = self.store.hgetall(&key).await?;
            // Deleted between KEYS and HGETALL.
            if fields.is_empty() {
                continue;
            }
            tasks.push(decode_task(&fields)?);
        }

        tasks.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(tasks)
    }

    /// Tasks in `status`. Full scan.
    pub async fn get_tasks_by_status(&self, status: TaskStatus) -> crate::Result<Vec<Task>> {
        let tasks = self.get_all_tasks().await?;
        Ok(tasks.into_iter().filter(|t| t.status == status).collect())
    }

    /// Tasks that declare a dependency on `id`. Full scan.
    pub async fn get_tasks_by_dependency(&self, id: &str) -> crate::Result<Vec<Task>> {
        let tasks = self.get_all_tasks().await?;
        Ok(tasks
            .into_iter()
            .filter(|t| t.dependency_ids().any(|dep| dep == id))
            .collect())
    }

    /// Number of queued tasks of `task_type`, or across every type when `None`
    pub async fn get_length(&self, task_type: Option<&str>) -> crate::Result<usize> {
        match task_type {
            Some(task_type) => self.store.zcard(&self.queue_key(task_type)).await,
            None => {
                let mut total = 0;
                for key in self.queue_keys().await? {
                    total += self.store.zcard(&key).await?;
                }
                Ok(total)
            }
        }
    }

    async fn queue_keys(&self) -> crate::Result<Vec<String>> {
        self.store
            .keys(&format!("{}:queue:*", self.prefix))
            .await
    }

    async fn top_of(&self, key: &str) -> crate::Result<Option<String>> {
        let top = self.store.zrange(key, -1, -1).await?;
        Ok(top.into_iter().next().map(|(id, _)| id))
    }

    /// Head of every non-empty queue, best score first
    async fn heads(&self) -> crate::Result<Vec<(String, String, f64)>> {
        let mut heads = Vec::new();
        for key in self.queue_keys().await? {
            if let Some((id, score)) = self.store.zrange(&key, -1, -1).await?.into_iter().next() {
                heads.push((key, id, score));
            }
        }
        heads.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(Ordering::Equal));
        Ok(heads)
    }

    /// Pop from whichever queue currently has the best head.
    ///
    /// Each pop is a single atomic `ZPOPMAX`, so concurrent callers never
    /// receive the same id; a queue drained in between is skipped.
    async fn pop_any(&self) -> crate::Result<Option<(String, f64)>> {
        for (key, _, _) in self.heads().await? {
            if let Some(popped) = self.store.zpopmax(&key).await? {
                return Ok(Some(popped));
            }
        }
        Ok(None)
    }
}
