//! The `Cache` seam (spec.md §1, §6): Redis or equivalent, keyed as
//! `rpm:{key_id}:{minute_bucket}`, `affinity:{affinity_key}:{sig}:{gm_id}`,
//! `circuit:{key_id}:{sig}`. Only the trait and the in-memory fallback live
//! here; `gproxy-storage` supplies the Redis-backed implementation so this
//! crate stays free of a concrete HTTP/DB/Redis client, matching how it
//! already keeps `UpstreamProvider` free of any concrete transport.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Option<Vec<u8>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64);
    async fn incr(&self, key: &str, ttl_secs: u64) -> u64;
    async fn delete(&self, key: &str);
}

pub fn rpm_key(key_id: i64, minute_bucket: u64) -> String {
    format!("rpm:{key_id}:{minute_bucket}")
}

pub fn affinity_key(affinity_key: &str, sig: &str, global_model_id: i64) -> String {
    format!("affinity:{affinity_key}:{sig}:{global_model_id}")
}

pub fn circuit_key(key_id: i64, sig: &str) -> String {
    format!("circuit:{key_id}:{sig}")
}

struct Entry {
    value: Vec<u8>,
    expires_at: std::time::Instant,
}

/// In-process fallback used when no Redis DSN is configured. Correctness is
/// preserved within one process (spec.md §5); it does not coordinate across
/// processes.
#[derive(Default)]
pub struct InMemoryCache {
    entries: Arc<RwLock<HashMap<String, Entry>>>,
}

impl InMemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get(&self, key: &str) -> Option<Vec<u8>> {
        let guard = self.entries.read().await;
        let entry = guard.get(key)?;
        if entry.expires_at <= std::time::Instant::now() {
            return None;
        }
        Some(entry.value.clone())
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl_secs: u64) {
        let mut guard = self.entries.write().await;
        guard.insert(
            key.to_string(),
            Entry {
                value,
                expires_at: std::time::Instant::now() + std::time::Duration::from_secs(ttl_secs),
            },
        );
    }

    async fn incr(&self, key: &str, ttl_secs: u64) -> u64 {
        let mut guard = self.entries.write().await;
        let now = std::time::Instant::now();
        let entry = guard.entry(key.to_string()).or_insert_with(|| Entry {
            value: 0u64.to_le_bytes().to_vec(),
            expires_at: now + std::time::Duration::from_secs(ttl_secs),
        });
        if entry.expires_at <= now {
            entry.value = 0u64.to_le_bytes().to_vec();
            entry.expires_at = now + std::time::Duration::from_secs(ttl_secs);
        }
        let mut buf = [0u8; 8];
        buf.copy_from_slice(&entry.value[..8]);
        let next = u64::from_le_bytes(buf) + 1;
        entry.value = next.to_le_bytes().to_vec();
        next
    }

    async fn delete(&self, key: &str) {
        self.entries.write().await.remove(key);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn incr_starts_at_one_and_accumulates() {
        let cache = InMemoryCache::new();
        assert_eq!(cache.incr("rpm:1:0", 70).await, 1);
        assert_eq!(cache.incr("rpm:1:0", 70).await, 2);
    }

    #[tokio::test]
    async fn set_then_get_roundtrips() {
        let cache = InMemoryCache::new();
        cache.set("affinity:a:sig:1", b"hello".to_vec(), 60).await;
        assert_eq!(cache.get("affinity:a:sig:1").await, Some(b"hello".to_vec()));
    }
}
