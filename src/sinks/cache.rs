use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use log::debug;
use serde_json::Value;
use tokio::time::Instant;

use crate::core::{DependencyResult, ResultCache};

struct Entry {
    value: Value,
    expires_at: Instant,
}

/// In-process result cache with per-entry expiry
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live value for `key`; expired entries are removed on read
    pub fn get(&self, key: &str) -> Option<Value> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Some(entry.value.clone());
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        None
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let purged = before.saturating_sub(self.entries.len());
        if purged > 0 {
            debug!("Purged {purged} expired cache entries");
        }
        purged
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn set(&self, key: &str, value: Value, ttl: Duration) -> DependencyResult<()> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test(start_paused = true)]
    async fn test_entries_expire() {
        let cache = MemoryCache::new();
        cache
            .set("dashboard:u1", json!({ "courses": 2 }), Duration::from_secs(300))
            .await
            .unwrap();
        assert_eq!(cache.get("dashboard:u1"), Some(json!({ "courses": 2 })));

        tokio::time::advance(Duration::from_secs(300)).await;
        assert_eq!(cache.get("dashboard:u1"), None);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_purge_expired() {
        let cache = MemoryCache::new();
        cache.set("a", json!(1), Duration::from_secs(10)).await.unwrap();
        cache.set("b", json!(2), Duration::from_secs(60)).await.unwrap();

        tokio::time::advance(Duration::from_secs(30)).await;
        assert_eq!(cache.purge_expired(), 1);
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("b"), Some(json!(2)));
    }

    #[tokio::test]
    async fn test_set_overwrites() {
        let cache = MemoryCache::new();
        cache.set("k", json!("old"), Duration::from_secs(5)).await.unwrap();
        cache.set("k", json!("new"), Duration::from_secs(5)).await.unwrap();
        assert_eq!(cache.get("k"), Some(json!("new")));
    }
}
