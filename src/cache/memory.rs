use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::debug;

use super::ResultCache;
use crate::pipeline::state::StepResult;

#[derive(Debug, Clone)]
struct CacheEntry {
    result: StepResult,
    expires_at: DateTime<Utc>,
}

/// In-process result cache. Entries vanish with the process.
#[derive(Debug, Default)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired entry.
    pub fn purge_expired(&self) {
        let now = Utc::now();
        self.entries.retain(|_, entry| entry.expires_at > now);
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &str) -> Option<StepResult> {
        let now = Utc::now();
        let hit = self
            .entries
            .get(key)
            .map(|entry| (entry.expires_at > now, entry.result.clone()));

        match hit {
            Some((true, result)) => Some(result),
            Some((false, _)) => {
                debug!(key = %key, "Cache entry expired");
                self.entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn put(&self, key: &str, result: &StepResult, ttl: Duration) {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        let expires_at = Utc::now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        self.entries.insert(
            key.to_string(),
            CacheEntry { result: result.clone(), expires_at },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_put_then_get() {
        let cache = MemoryCache::new();
        let result = StepResult::completed(json!({"ok": true}));
        cache.put("step:abc", &result, Duration::from_secs(60)).await;
        assert_eq!(cache.get("step:abc").await, Some(result));
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key() {
        let cache = MemoryCache::new();
        assert!(cache.get("nope").await.is_none());
    }

    #[tokio::test]
    async fn test_expired_entry_is_dropped() {
        let cache = MemoryCache::new();
        cache.put("k", &StepResult::completed(json!(1)), Duration::ZERO).await;
        assert!(cache.get("k").await.is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_purge_expired_keeps_live_entries() {
        let cache = MemoryCache::new();
        cache.put("old", &StepResult::completed(json!(1)), Duration::ZERO).await;
        cache.put("new", &StepResult::completed(json!(2)), Duration::from_secs(3600)).await;
        cache.purge_expired();
        assert_eq!(cache.len(), 1);
        assert!(cache.get("new").await.is_some());
    }
}
