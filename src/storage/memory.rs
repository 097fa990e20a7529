//! Memory

use crate::storage::{ScoredMember, Store};
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// Sorted-set entry ordered by score, then member, as Redis orders them
#[derive(Debug, Clone)]
struct Entry {
    score: f64,
    member: String,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.score
            .total_cmp(&other.score)
            .then_with(|| self.member.cmp(&other.member))
    }
}

#[derive(Debug, Default)]
struct SortedSet {
    scores: HashMap<String, f64>,
    ordered: BTreeSet<Entry>,
}

impl SortedSet {
    fn insert(&mut self, member: &str, score: f64) {
        if let Some(old) = self.scores.insert(member.to_string(), score) {
            self.ordered.remove(&Entry {
                score: old,
                member: member.to_string(),
            });
        }
        self.ordered.insert(Entry {
            score,
            member: member.to_string(),
        });
    }

    fn remove(&mut self, member: &str) -> bool {
        match self.scores.remove(member) {
            Some(score) => {
                self.ordered.remove(&Entry {
                    score,
                    member: member.to_string(),
                });
                true
            }
            None => false,
        }
    }

    fn pop_max(&mut self) -> Option<ScoredMember> {
        let entry = self.ordered.pop_last()?;
        self.scores.remove(&entry.member);
        Some((entry.member, entry.score))
    }

    fn len(&self) -> usize {
        self.ordered.len()
    }

    fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }

    fn range(&self, start: isize, stop: isize) -> Vec<ScoredMember> {
        let len = self.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let stop = if stop < 0 { len + stop } else { stop.min(len - 1) };

        if len == 0 || start > stop || start >= len {
            return Vec::new();
        }

        self.ordered
            .iter()
            .skip(start as usize)
            .take((stop - start + 1) as usize)
            .map(|e| (e.member.clone(), e.score))
            .collect()
    }
}

#[derive(Debug, Default)]
struct Inner {
    strings: HashMap<String, String>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, SortedSet>,
}

/// In-process [`Store`] implementation.
///
/// Every primitive takes the lock once, so each call is atomic the way a
/// single Redis command is. Empty hashes and sorted sets are dropped, which
/// keeps `keys` consistent with Redis.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<RwLock<Inner>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, key: &str) -> crate::Result<Option<String>> {
        let inner = self.inner.read().await;
        Ok(inner.strings.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> crate::Result<()> {
        let mut inner = self.inner.write().await;
        inner.hashes.remove(key);
        inner.zsets.remove(key);
        inner.strings.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn del(&self, key: &str) -> crate::Result<bool> {
        let mut inner = self.inner.write().await;
        let existed = inner.strings.remove(key).is_some()
            | inner.hashes.remove(key).is_some()
            | inner.zsets.remove(key).is_some();
        Ok(existed)
    }

    async fn keys(&self, pattern: &str) -> crate::Result<Vec<String>> {
        let pattern = glob::Pattern::new(pattern).map_err(|e| {
            crate::TaskQueueError::StorageError(format!("Invalid key pattern {}: {}", pattern, e))
        })?;

        let inner = self.inner.read().await;
        let keys = inner
            .strings
            .keys()
            .chain(inner.hashes.keys())
            .chain(inner.zsets.keys())
            .filter(|k| pattern.matches(k))
            .cloned()
            .collect();
        Ok(keys)
    }

    async fn hset(&self, key: &str, fields: &HashMap<String, String>) -> crate::Result<()> {
        if fields.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().await;
        let hash = inner.hashes.entry(key.to_string()).or_default();
        for (field, value) in fields {
            hash.insert(field.clone(), value.clone());
        }
        Ok(())
    }

    async fn hgetall(&self, key: &str) -> crate::Result<HashMap<String, String>> {
        let inner = self.inner.read().await;
        Ok(inner.hashes.get(key).cloned().unwrap_or_default())
    }

    async fn zadd(&self, key: &str, member: &str, score: f64) -> crate::Result<()> {
        let mut inner = self.inner.write().await;
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member, score);
        debug!("zadd {} {} {}", key, member, score);
        Ok(())
    }

    async fn zrange(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> crate::Result<Vec<ScoredMember>> {
        let inner = self.inner.read().await;
        Ok(inner
            .zsets
            .get(key)
            .map(|set| set.range(start, stop))
            .unwrap_or_default())
    }

    async fn zpopmax(&self, key: &str) -> crate::Result<Option<ScoredMember>> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(None);
        };

        let popped = set.pop_max();
        if set.is_empty() {
            inner.zsets.remove(key);
        }
        Ok(popped)
    }

    async fn zrem(&self, key: &str, member: &str) -> crate::Result<bool> {
        let mut inner = self.inner.write().await;
        let Some(set) = inner.zsets.get_mut(key) else {
            return Ok(false);
        };

        let removed = set.remove(member);
        if set.is_empty() {
            inner.zsets.remove(key);
        }
        Ok(removed)
    }

    async fn zcard(&self, key: &str) -> crate::Result<usize> {
        let inner = self.inner.read().await;
        Ok(inner.zsets.get(key).map(SortedSet::len).unwrap_or(0))
    }

    async fn health_check(&self) -> bool {
        true
    }
}
