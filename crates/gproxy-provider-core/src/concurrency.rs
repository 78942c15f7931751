//! Per-key atomic RPM counters in a minute-granular bucket, plus the
//! AdaptiveReservationManager that reserves headroom for cache-affinity
//! callers over brand-new ones.
//!
//! The counter itself is the correctness-bearing piece (spec.md §5): it must
//! be checked and incremented in one critical section. `Cache`-backed
//! deployments push this into a Redis Lua script; the in-process fallback
//! here uses a single `RwLock` per bucket key, which gives the same
//! atomicity within one process.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::model::{EndpointSignature, ProviderApiKeyId};

const PROBE_RESERVATION_RATIO: f64 = 0.10;
const MIN_STABLE_RATIO: f64 = 0.10;
const MAX_STABLE_RATIO: f64 = 0.35;
const PROBE_SUCCESS_THRESHOLD: u32 = 20;

type BucketKey = (ProviderApiKeyId, EndpointSignature, u64);

struct RpmBucket {
    count: u32,
    started_at: Instant,
}

/// Two-phase reservation estimator: process-local, never blocks the
/// admission decision itself (spec.md §5 — "it never blocks admission
/// correctness").
struct ReservationState {
    n_success: u32,
    recent_429: u32,
    last_429_at: Option<Instant>,
    confidence: f64,
    ratio: f64,
}

impl ReservationState {
    fn new() -> Self {
        Self {
            n_success: 0,
            recent_429: 0,
            last_429_at: None,
            confidence: 0.0,
            ratio: PROBE_RESERVATION_RATIO,
        }
    }

    fn in_probe_phase(&self) -> bool {
        if self.n_success < PROBE_SUCCESS_THRESHOLD {
            return true;
        }
        match self.last_429_at {
            Some(at) => Instant::now().saturating_duration_since(at) < COOLDOWN_WINDOW,
            None => false,
        }
    }

    fn record_success(&mut self) {
        self.n_success = self.n_success.saturating_add(1);
        if !self.in_probe_phase() {
            self.confidence = (self.confidence + 0.05).min(1.0);
            // Load grows headroom back toward the floor as confidence climbs.
            let target = MIN_STABLE_RATIO + (MAX_STABLE_RATIO - MIN_STABLE_RATIO) * (1.0 - self.confidence);
            self.ratio = target.clamp(MIN_STABLE_RATIO, MAX_STABLE_RATIO);
        }
    }

    fn record_rate_limited(&mut self) {
        self.recent_429 = self.recent_429.saturating_add(1);
        self.last_429_at = Some(Instant::now());
        self.confidence = (self.confidence - 0.2).max(0.0);
        self.ratio = MAX_STABLE_RATIO;
    }

    fn ratio(&self) -> f64 {
        if self.in_probe_phase() {
            PROBE_RESERVATION_RATIO
        } else {
            self.ratio.clamp(MIN_STABLE_RATIO, MAX_STABLE_RATIO)
        }
    }
}

const COOLDOWN_WINDOW: std::time::Duration = std::time::Duration::from_secs(60);
const BUCKET_TTL_SECS: u64 = 70;

pub struct ConcurrencyManager {
    buckets: Arc<RwLock<HashMap<BucketKey, RpmBucket>>>,
    reservations: Arc<RwLock<HashMap<(ProviderApiKeyId, EndpointSignature), ReservationState>>>,
}

impl Default for ConcurrencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ConcurrencyManager {
    pub fn new() -> Self {
        Self {
            buckets: Arc::new(RwLock::new(HashMap::new())),
            reservations: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    fn minute_bucket(now_epoch_secs: u64) -> u64 {
        now_epoch_secs / 60
    }

    async fn current_count(&self, key_id: ProviderApiKeyId, sig: EndpointSignature, now_epoch_secs: u64) -> u32 {
        let bucket_id = Self::minute_bucket(now_epoch_secs);
        let guard = self.buckets.read().await;
        guard.get(&(key_id, sig, bucket_id)).map(|b| b.count).unwrap_or(0)
    }

    /// Admission rule from spec.md §4.4: cached callers admit iff `c < L`;
    /// new callers admit iff `c < max(1, floor(L * (1-r)))`.
    pub async fn try_admit(
        &self,
        key_id: ProviderApiKeyId,
        sig: EndpointSignature,
        limit: Option<u32>,
        is_cached_caller: bool,
        now_epoch_secs: u64,
    ) -> bool {
        let Some(limit) = limit else {
            self.increment(key_id, sig, now_epoch_secs).await;
            return true;
        };
        let bucket_id = Self::minute_bucket(now_epoch_secs);
        let r = self.reservation_ratio(key_id, sig).await;
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry((key_id, sig, bucket_id)).or_insert_with(|| RpmBucket {
            count: 0,
            started_at: Instant::now(),
        });
        let threshold = if is_cached_caller {
            limit
        } else {
            (((limit as f64) * (1.0 - r)).floor() as u32).max(1)
        };
        if bucket.count < threshold {
            bucket.count += 1;
            true
        } else {
            false
        }
    }

    async fn increment(&self, key_id: ProviderApiKeyId, sig: EndpointSignature, now_epoch_secs: u64) {
        let bucket_id = Self::minute_bucket(now_epoch_secs);
        let mut buckets = self.buckets.write().await;
        let bucket = buckets.entry((key_id, sig, bucket_id)).or_insert_with(|| RpmBucket {
            count: 0,
            started_at: Instant::now(),
        });
        bucket.count += 1;
    }

    pub async fn observed_rpm(&self, key_id: ProviderApiKeyId, sig: EndpointSignature, now_epoch_secs: u64) -> u32 {
        self.current_count(key_id, sig, now_epoch_secs).await
    }

    pub async fn reservation_ratio(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) -> f64 {
        let guard = self.reservations.read().await;
        guard
            .get(&(key_id, sig))
            .map(|s| s.ratio())
            .unwrap_or(PROBE_RESERVATION_RATIO)
    }

    pub async fn record_success(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) {
        let mut guard = self.reservations.write().await;
        guard
            .entry((key_id, sig))
            .or_insert_with(ReservationState::new)
            .record_success();
    }

    pub async fn record_rate_limited(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) {
        let mut guard = self.reservations.write().await;
        guard
            .entry((key_id, sig))
            .or_insert_with(ReservationState::new)
            .record_rate_limited();
    }

    /// Drops buckets older than their 70s TTL; call periodically from a
    /// background sweep, same pattern as `UnavailableQueue`'s recover task.
    pub async fn sweep_expired(&self, now_epoch_secs: u64) {
        let mut buckets = self.buckets.write().await;
        let current = Self::minute_bucket(now_epoch_secs);
        buckets.retain(|(_, _, bucket_id), b| {
            *bucket_id >= current || b.started_at.elapsed().as_secs() < BUCKET_TTL_SECS
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiFamily, EndpointKind};

    fn sig() -> EndpointSignature {
        EndpointSignature::new(ApiFamily::OpenAI, EndpointKind::Chat)
    }

    #[tokio::test]
    async fn admission_boundary_matches_spec_example() {
        // L=10, r=0.2 (forced via rate-limited state) -> new users admit while count < 8.
        let mgr = ConcurrencyManager::new();
        mgr.record_rate_limited(1, sig()).await; // pushes ratio toward the ceiling (0.35) first
        // Force a specific ratio by constructing directly for the deterministic example.
        {
            let mut guard = mgr.reservations.write().await;
            guard.insert((1, sig()), ReservationState {
                n_success: PROBE_SUCCESS_THRESHOLD,
                recent_429: 0,
                last_429_at: None,
                confidence: 0.0,
                ratio: 0.2,
            });
        }
        let mut admitted_new = 0;
        for _ in 0..10 {
            if mgr.try_admit(1, sig(), Some(10), false, 0).await {
                admitted_new += 1;
            }
        }
        assert_eq!(admitted_new, 8);
    }

    #[tokio::test]
    async fn cached_caller_admits_up_to_full_limit() {
        let mgr = ConcurrencyManager::new();
        let mut admitted = 0;
        for _ in 0..10 {
            if mgr.try_admit(1, sig(), Some(10), true, 0).await {
                admitted += 1;
            }
        }
        assert_eq!(admitted, 10);
    }

    #[tokio::test]
    async fn no_limit_means_unlimited_admission() {
        let mgr = ConcurrencyManager::new();
        for _ in 0..100 {
            assert!(mgr.try_admit(1, sig(), None, false, 0).await);
        }
    }
}
