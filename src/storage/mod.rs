/// In-process store implementation
pub mod memory;
/// Redis store implementation
#[cfg(feature = "redis")]
pub mod redis;

use async_trait::async_trait;
use std::collections::HashMap;

/// A sorted-set member together with its score
pub type ScoredMember = (String, f64);

/// Minimal key-value + sorted-set store the queue is built on.
///
/// Semantics follow the Redis commands of the same name. Each call must be
/// atomic on its own; sequences of calls are not transactional.
#[async_trait]
pub trait Store: Send + Sync {
    /// Read a string value
    async fn get(&self, key: &str) -> crate::Result<Option<String>>;

    /// Write a string value, replacing any previous value
    async fn set(&self, key: &str, value: &str) -> crate::Result<()>;

    /// Delete a key of any type; returns whether it existed
    async fn del(&self, key: &str) -> crate::Result<bool>;

    /// List keys matching a glob-style pattern
    async fn keys(&self, pattern: &str) -> crate::Result<Vec<String>>;

    /// Set the given fields of a hash, leaving other fields untouched
    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> crate::Result<()>;

    /// Read every field of a hash; a missing key yields an empty map
    async fn hgetall(&self, key: &str) -> crate::Result<HashMap<String, String>>;

    /// Add a member to a sorted set, or update its score
    async fn zadd(&self, key: &str, member: &str, score: f64) -> crate::Result<()>;

    /// Members ranked `start..=stop` in ascending score order, with scores.
    /// Negative indices count from the highest-scored end.
    async fn zrange(&self, key: &str, start: isize, stop: isize)
        -> crate::Result<Vec<ScoredMember>>;

    /// Atomically remove and return the highest-scored member
    async fn zpopmax(&self, key: &str) -> crate::Result<Option<ScoredMember>>;

    /// Remove a member from a sorted set; returns whether it was present
    async fn zrem(&self, key: &str, member: &str) -> crate::Result<bool>;

    /// Number of members in a sorted set
    async fn zcard(&self, key: &str) -> crate::Result<usize>;

    /// Check if storage is healthy
    async fn health_check(&self) -> bool;
}
