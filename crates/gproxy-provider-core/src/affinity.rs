//! `(affinity_key, endpoint_signature, global_model_id) -> (provider, endpoint, key)`
//! with a sliding TTL sourced from the chosen key's `cache_ttl_minutes`.
//!
//! No teacher precedent for this exact shape; built the same way
//! `CredentialPool` tracks per-credential state (`RwLock<HashMap<..>>`) since
//! that is this codebase's idiom for "small mutable map guarded by a lock",
//! rather than introducing a new concurrency primitive for it.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::model::{EndpointId, EndpointSignature, GlobalModelId, ProviderApiKeyId, ProviderId};

pub type AffinityKey = String;

#[derive(Debug, Clone)]
pub struct AffinityTarget {
    pub provider_id: ProviderId,
    pub endpoint_id: EndpointId,
    pub key_id: ProviderApiKeyId,
    pub request_count: u64,
    pub supports_caching: bool,
}

struct AffinityEntry {
    target: AffinityTarget,
    expires_at: Instant,
    ttl: Duration,
}

type MapKey = (AffinityKey, EndpointSignature, GlobalModelId);

pub struct CacheAffinityManager {
    entries: Arc<RwLock<HashMap<MapKey, AffinityEntry>>>,
}

impl Default for CacheAffinityManager {
    fn default() -> Self {
        Self::new()
    }
}

impl CacheAffinityManager {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn lookup(
        &self,
        affinity_key: &str,
        sig: EndpointSignature,
        global_model_id: GlobalModelId,
    ) -> Option<AffinityTarget> {
        let guard = self.entries.read().await;
        let entry = guard.get(&(affinity_key.to_string(), sig, global_model_id))?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.target.clone())
    }

    /// `cache_ttl_minutes == 0` disables affinity for that key entirely
    /// (spec.md §4.5): callers must not record or extend an entry for it.
    pub async fn record_success(
        &self,
        affinity_key: &str,
        sig: EndpointSignature,
        global_model_id: GlobalModelId,
        target: AffinityTarget,
        cache_ttl_minutes: u32,
    ) {
        if cache_ttl_minutes == 0 {
            return;
        }
        let ttl = Duration::from_secs(cache_ttl_minutes as u64 * 60);
        let mut guard = self.entries.write().await;
        let key = (affinity_key.to_string(), sig, global_model_id);
        let entry = guard.entry(key).or_insert_with(|| AffinityEntry {
            target: target.clone(),
            expires_at: Instant::now() + ttl,
            ttl,
        });
        entry.target = AffinityTarget {
            request_count: entry.target.request_count + 1,
            ..target
        };
        entry.ttl = ttl;
        // Sliding window: every successful use resets the TTL.
        entry.expires_at = Instant::now() + ttl;
    }

    /// Invalidated on auth failure, circuit-open events, or explicit
    /// key-rotation — never on a bare 429 (Open Question, resolved in
    /// DESIGN.md: spec as-is says do not invalidate on 429).
    pub async fn invalidate(&self, affinity_key: &str, sig: EndpointSignature, global_model_id: GlobalModelId) {
        let mut guard = self.entries.write().await;
        guard.remove(&(affinity_key.to_string(), sig, global_model_id));
    }

    pub async fn invalidate_key(&self, key_id: ProviderApiKeyId) {
        let mut guard = self.entries.write().await;
        guard.retain(|_, entry| entry.target.key_id != key_id);
    }

    pub async fn sweep_expired(&self) {
        let mut guard = self.entries.write().await;
        let now = Instant::now();
        guard.retain(|_, entry| entry.expires_at > now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiFamily, EndpointKind};

    fn sig() -> EndpointSignature {
        EndpointSignature::new(ApiFamily::Claude, EndpointKind::Chat)
    }

    fn target() -> AffinityTarget {
        AffinityTarget {
            provider_id: 1,
            endpoint_id: 1,
            key_id: 1,
            request_count: 0,
            supports_caching: true,
        }
    }

    #[tokio::test]
    async fn ttl_zero_disables_affinity() {
        let mgr = CacheAffinityManager::new();
        mgr.record_success("caller-a", sig(), 1, target(), 0).await;
        assert!(mgr.lookup("caller-a", sig(), 1).await.is_none());
    }

    #[tokio::test]
    async fn hit_then_invalidate_clears_entry() {
        let mgr = CacheAffinityManager::new();
        mgr.record_success("caller-a", sig(), 1, target(), 15).await;
        assert!(mgr.lookup("caller-a", sig(), 1).await.is_some());
        mgr.invalidate("caller-a", sig(), 1).await;
        assert!(mgr.lookup("caller-a", sig(), 1).await.is_none());
    }

    #[tokio::test]
    async fn request_count_accumulates_on_repeated_hits() {
        let mgr = CacheAffinityManager::new();
        mgr.record_success("caller-a", sig(), 1, target(), 15).await;
        mgr.record_success("caller-a", sig(), 1, target(), 15).await;
        let hit = mgr.lookup("caller-a", sig(), 1).await.unwrap();
        assert_eq!(hit.request_count, 2);
    }
}
