//! Per-`(key_id, endpoint_signature)` circuit breaker and adaptive RPM
//! learning. Built the same way `CredentialPool` tracks per-credential
//! state (`Arc<RwLock<HashMap<..>>>`), extended with a genuine half_open
//! trial state instead of the binary active/unavailable the pool uses.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::time::Instant;

use crate::model::{EndpointSignature, ProviderApiKeyId};

const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
const DEFAULT_COOLDOWN_FLOOR: Duration = Duration::from_secs(5);
const DEFAULT_COOLDOWN_CEILING: Duration = Duration::from_secs(300);
const RPM_SHRINK_FACTOR: f64 = 0.5;
const RPM_GROWTH_STEP: u32 = 5;
const RPM_GROWTH_SUCCESS_WINDOW: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    CircuitOpen,
    AuthInvalid,
    RateLimitCeiling,
}

type Key = (ProviderApiKeyId, EndpointSignature);

#[derive(Debug)]
struct BreakerEntry {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    cooldown: Duration,
    /// RPM learning.
    learned_rpm_limit: u32,
    recent_success_streak: u32,
}

impl BreakerEntry {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
            cooldown: DEFAULT_COOLDOWN_FLOOR,
            learned_rpm_limit: 0,
            recent_success_streak: 0,
        }
    }

    fn maybe_half_open(&mut self) {
        if self.state != CircuitState::Open {
            return;
        }
        let Some(opened_at) = self.opened_at else {
            return;
        };
        if Instant::now().saturating_duration_since(opened_at) >= self.cooldown {
            self.state = CircuitState::HalfOpen;
        }
    }
}

/// Reasons a failure can escalate `closed -> open` immediately, independent
/// of the consecutive-failure counter.
#[derive(Debug, Clone, Copy)]
pub enum FailureKind {
    Generic,
    Auth,
    RateLimited { retry_after: Option<Duration> },
}

pub struct HealthMonitor {
    entries: Arc<RwLock<HashMap<Key, BreakerEntry>>>,
    failure_threshold: u32,
    rate_limit_ceiling: Duration,
}

impl Default for HealthMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthMonitor {
    pub fn new() -> Self {
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            rate_limit_ceiling: Duration::from_secs(60),
        }
    }

    /// `(available, reason)` — `reason` is attached to the candidate's skip
    /// record when unavailable.
    pub async fn check(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) -> (bool, Option<SkipReason>) {
        let mut guard = self.entries.write().await;
        let entry = guard.entry((key_id, sig)).or_insert_with(BreakerEntry::new);
        entry.maybe_half_open();
        match entry.state {
            CircuitState::Closed | CircuitState::HalfOpen => (true, None),
            CircuitState::Open => (false, Some(SkipReason::CircuitOpen)),
        }
    }

    pub async fn record_success(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) {
        let mut guard = self.entries.write().await;
        let entry = guard.entry((key_id, sig)).or_insert_with(BreakerEntry::new);
        entry.consecutive_failures = 0;
        entry.opened_at = None;
        entry.cooldown = DEFAULT_COOLDOWN_FLOOR;
        match entry.state {
            CircuitState::HalfOpen => entry.state = CircuitState::Closed,
            CircuitState::Open => entry.state = CircuitState::Closed,
            CircuitState::Closed => {}
        }
        entry.recent_success_streak = entry.recent_success_streak.saturating_add(1);
        if entry.recent_success_streak >= RPM_GROWTH_SUCCESS_WINDOW && entry.learned_rpm_limit > 0 {
            entry.learned_rpm_limit += RPM_GROWTH_STEP;
            entry.recent_success_streak = 0;
        }
    }

    pub async fn record_failure(&self, key_id: ProviderApiKeyId, sig: EndpointSignature, kind: FailureKind) {
        let mut guard = self.entries.write().await;
        let entry = guard.entry((key_id, sig)).or_insert_with(BreakerEntry::new);
        entry.recent_success_streak = 0;

        if entry.state == CircuitState::HalfOpen {
            self.open(entry);
            return;
        }

        match kind {
            FailureKind::Auth => {
                self.open(entry);
                return;
            }
            FailureKind::RateLimited { retry_after } => {
                if let Some(retry_after) = retry_after {
                    if retry_after > self.rate_limit_ceiling {
                        self.open(entry);
                        return;
                    }
                }
                entry.consecutive_failures += 1;
            }
            FailureKind::Generic => {
                entry.consecutive_failures += 1;
            }
        }

        if entry.consecutive_failures >= self.failure_threshold {
            self.open(entry);
        }
    }

    fn open(&self, entry: &mut BreakerEntry) {
        entry.state = CircuitState::Open;
        entry.opened_at = Some(Instant::now());
        let doubled = entry.cooldown.saturating_mul(2);
        let jitter_ms = (doubled.as_millis() as u64 / 10).max(1);
        let jitter = Duration::from_millis(jitter_ms.min(5_000));
        entry.cooldown = doubled.min(DEFAULT_COOLDOWN_CEILING) + jitter;
    }

    /// `current_observed_rpm` is supplied by `ConcurrencyManager`; on 429 the
    /// learned limit shrinks, never below 1.
    pub async fn shrink_rpm_on_rate_limit(&self, key_id: ProviderApiKeyId, sig: EndpointSignature, current_observed_rpm: u32) {
        let mut guard = self.entries.write().await;
        let entry = guard.entry((key_id, sig)).or_insert_with(BreakerEntry::new);
        let shrunk = ((current_observed_rpm as f64) * RPM_SHRINK_FACTOR).floor() as u32;
        entry.learned_rpm_limit = shrunk.max(1);
    }

    pub async fn learned_rpm_limit(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) -> u32 {
        let guard = self.entries.read().await;
        guard
            .get(&(key_id, sig))
            .map(|e| e.learned_rpm_limit)
            .unwrap_or(0)
    }

    pub async fn state(&self, key_id: ProviderApiKeyId, sig: EndpointSignature) -> CircuitState {
        let mut guard = self.entries.write().await;
        let entry = guard.entry((key_id, sig)).or_insert_with(BreakerEntry::new);
        entry.maybe_half_open();
        entry.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ApiFamily, EndpointKind};

    fn sig() -> EndpointSignature {
        EndpointSignature::new(ApiFamily::Claude, EndpointKind::Chat)
    }

    #[tokio::test]
    async fn closed_to_open_on_consecutive_failures() {
        let monitor = HealthMonitor::new();
        for _ in 0..DEFAULT_FAILURE_THRESHOLD {
            monitor.record_failure(1, sig(), FailureKind::Generic).await;
        }
        let (available, reason) = monitor.check(1, sig()).await;
        assert!(!available);
        assert_eq!(reason, Some(SkipReason::CircuitOpen));
    }

    #[tokio::test]
    async fn auth_failure_opens_immediately() {
        let monitor = HealthMonitor::new();
        monitor.record_failure(1, sig(), FailureKind::Auth).await;
        let (available, _) = monitor.check(1, sig()).await;
        assert!(!available);
    }

    #[tokio::test]
    async fn half_open_closes_on_one_success_or_reopens_on_one_failure() {
        let monitor = HealthMonitor::new();
        monitor.record_failure(1, sig(), FailureKind::Auth).await;
        {
            let mut guard = monitor.entries.write().await;
            let entry = guard.get_mut(&(1, sig())).unwrap();
            entry.opened_at = Some(Instant::now() - Duration::from_secs(600));
        }
        assert_eq!(monitor.state(1, sig()).await, CircuitState::HalfOpen);
        monitor.record_success(1, sig()).await;
        assert_eq!(monitor.state(1, sig()).await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn rate_limit_shrinks_learned_rpm_limit() {
        let monitor = HealthMonitor::new();
        monitor.shrink_rpm_on_rate_limit(1, sig(), 20).await;
        assert_eq!(monitor.learned_rpm_limit(1, sig()).await, 10);
    }
}
