use crate::task::{Task, TaskStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Filter for [`TaskManager::find_tasks`](crate::TaskManager::find_tasks).
///
/// Every provided predicate must hold. Empty lists and unset options do not
/// constrain anything.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TaskQuery {
    /// Accepted task types
    pub types: Vec<String>,
    /// Accepted priorities
    pub priorities: Vec<i32>,
    /// Accepted statuses
    pub statuses: Vec<TaskStatus>,
    /// Required `metadata.createdBy`
    pub created_by: Option<String>,
    /// Required `metadata.assignedTo`
    pub assigned_to: Option<String>,
    /// Every tag listed must be present on the task
    pub tags: Vec<String>,
    /// Inclusive lower bound on `createdAt`
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound on `createdAt`
    pub created_before: Option<DateTime<Utc>>,
    /// Equality on metadata keys, reserved (camelCase) or caller-defined
    pub metadata: HashMap<String, serde_json::Value>,
}

impl TaskQuery {
    /// Query matching every task
    pub fn new() -> Self {
        Self::default()
    }

    /// Also accept `task_type`
    pub fn with_type(mut self, task_type: impl Into<String>) -> Self {
        self.types.push(task_type.into());
        self
    }

    /// Also accept `status`
    pub fn with_status(mut self, status: TaskStatus) -> Self {
        self.statuses.push(status);
        self
    }

    /// Also accept `priority`
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priorities.push(priority);
        self
    }

    /// Require `tag`
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.push(tag.into());
        self
    }

    /// Require metadata `key` to equal `value`
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Whether `task` satisfies every predicate
    pub fn matches(&self, task: &Task) -> bool {
        if !self.types.is_empty() && !self.types.contains(&task.task_type) {
            return false;
        }
        if !self.priorities.is_empty() && !self.priorities.contains(&task.priority) {
            return false;
        }
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if self.created_by.is_some() && task.metadata.created_by != self.created_by {
            return false;
        }
        if self.assigned_to.is_some() && task.metadata.assigned_to != self.assigned_to {
            return false;
        }
        if !self.tags.iter().all(|tag| task.metadata.tags.contains(tag)) {
            return false;
        }
        if self.created_after.is_some_and(|after| task.created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| task.created_at > before) {
            return false;
        }
        self.metadata_matches(task)
    }

    fn metadata_matches(&self, task: &Task) -> bool {
        if self.metadata.is_empty() {
            return true;
        }
        let Ok(serde_json::Value::Object(fields)) = serde_json::to_value(&task.metadata) else {
            return false;
        };
        self.metadata
            .iter()
            .all(|(key, expected)| fields.get(key) == Some(expected))
    }
}
