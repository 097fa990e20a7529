//! Score

use crate::task::Task;
use chrono::{DateTime, Utc};

/// Multiplier that keeps priority tiers apart
pub const PRIORITY_WEIGHT: i64 = 10_000_000;
/// Penalty per declared dependency
pub const DEPENDENCY_WEIGHT: i64 = 1_000;
/// Upper bound of the deadline bonus
pub const MAX_DEADLINE_BONUS: i64 = 1_000_000;
/// Largest priority magnitude that scores distinctly.
///
/// Scores are stored as `f64`, which holds integers exactly only up to
/// 2^53; beyond this bound the dependency and deadline terms would be lost
/// to rounding, so priorities are clamped to `[-PRIORITY_LIMIT, PRIORITY_LIMIT]`.
pub const PRIORITY_LIMIT: i32 = 900_000_000;

/// Bonus for tasks with a deadline, growing as the deadline approaches.
///
/// Always within `[0, MAX_DEADLINE_BONUS]`; a deadline already passed gets
/// the full bonus.
pub fn deadline_bonus(end_time: Option<DateTime<Utc>>, now: DateTime<Utc>) -> i64 {
    let Some(end_time) = end_time else {
        return 0;
    };
    let minutes_left = (end_time - now).num_minutes().max(0);
    (MAX_DEADLINE_BONUS - minutes_left).clamp(0, MAX_DEADLINE_BONUS)
}

/// Queue score of `task` at `now`, using `priority` in place of the task's own.
///
/// `priority * 10_000_000 - dependencies * 1_000 + deadline_bonus`; higher
/// scores are dequeued first. `priority` is clamped to [`PRIORITY_LIMIT`].
pub fn score_at(task: &Task, priority: i32, now: DateTime<Utc>) -> f64 {
    let dependency_count = i64::try_from(task.dependencies.len()).unwrap_or(i64::MAX);
    let priority = priority.clamp(-PRIORITY_LIMIT, PRIORITY_LIMIT);
    let score = i64::from(priority)
        .saturating_mul(PRIORITY_WEIGHT)
        .saturating_sub(dependency_count.saturating_mul(DEPENDENCY_WEIGHT))
        .saturating_add(deadline_bonus(task.metadata.end_time, now));
    score as f64
}

/// Queue score of `task` now
pub fn compute_score(task: &Task, priority: i32) -> f64 {
    score_at(task, priority, Utc::now())
}
