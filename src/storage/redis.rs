//! Redis

use crate::storage::{ScoredMember, Store};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashMap;
use tracing::{info, warn};

/// [`Store`] backed by a Redis server.
///
/// Redis executes each command atomically, which is the only guarantee the
/// queue relies on for "one popped task, one worker".
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    /// Connect to the Redis server at `url`
    pub async fn connect(url: &str) -> crate::Result<Self> {
        let client = redis::Client::open(url).map_err(storage_error)?;
        let conn = ConnectionManager::new(client)
            .await
            .map_err(storage_error)?;
        info!("Connected to redis at {}", url);
        Ok(Self { conn })
    }
}

fn storage_error(e: redis::RedisError) -> crate::TaskQueueError {
    crate::TaskQueueError::StorageError(e.to_string())
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let mut conn = self.conn.clone();
        conn.get(key).await.map_err(storage_error)
    }

    async fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        let mut conn = self.conn.clone();
        conn.set(key, value).await.map_err(storage_error)
    }

    async fn del(&self, key: &str) -> crate::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(storage_error)?;
        Ok(removed > 0)
    }

    async fn keys(&self, pattern: &str) -> crate::Result<Vec<String>> {
        let mut conn = self.conn.clone();
        conn.keys(pattern).await.map_err(storage_error)
    }

    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> crate::Result<()> {
        if fields.is_empty() {
            return Ok(());
        }
        let items: Vec<(&str, &str)> = fields
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let mut conn = self.conn.clone();
        conn.hset_multiple(key, &items).await.map_err(storage_error)
    }

    async fn hgetall(&self, key: &str) -> crate::Result<HashMap<String, String>> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(storage_error)
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> crate::Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(key, member, score).await.map_err(storage_error)?;
        Ok(())
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> crate::Result<Vec<ScoredMember>> {
        let mut conn = self.conn.clone();
        conn.zrange_withscores(key, start, stop)
            .await
            .map_err(storage_error)
    }

    async fn zpopmax(&self, key: &str) -> crate::Result<Option<ScoredMember>> {
        let mut conn = self.conn.clone();
        let popped: Vec<ScoredMember> = conn.zpopmax(key, 1).await.map_err(storage_error)?;
        Ok(popped.into_iter().next())
    }

    async fn zrem(&self, key: &str, member: &str) -> crate::Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.zrem(key, member).await.map_err(storage_error)?;
        Ok(removed > 0)
    }

    async fn zcard(&self, key: &str) -> crate::Result<usize> {
        let mut conn = self.conn.clone();
        conn.zcard(key).await.map_err(storage_error)
    }

    async fn health_check(&self) -> bool {
        let mut conn = self.conn.clone();
        match redis::cmd("PING").query_async::<_, String>(&mut conn).await {
            Ok(_) => true,
            Err(e) => {
                warn!("Redis health check failed: {}", e);
                false
            }
        }
    }
}
