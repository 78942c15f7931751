//! `FailoverEngine` (spec.md §4.8): sequential attempts with retry/rectify
//! policy, recording a `RequestCandidate` audit row per attempt.
//!
//! The handler is a pure function from `(error_kind, candidate, retry_state)
//! -> action` (spec.md §9's "exceptions as control flow" note), kept as a
//! plain match rather than a trait-object dispatch table since the action
//! set is closed and small.

use std::collections::HashSet;
use std::future::Future;
use std::time::Duration;

use serde_json::Value as JsonValue;

use gproxy_provider_core::affinity::CacheAffinityManager;
use gproxy_provider_core::concurrency::ConcurrencyManager;
use gproxy_provider_core::health::{FailureKind, HealthMonitor};
use gproxy_provider_core::model::{
    CandidateState, EndpointId, GlobalModelId, ProviderApiKeyId, ProviderId, RequestCandidate,
};
use gproxy_provider_core::store::UsageStore;

use super::candidate::Candidate;
use super::rectify::{rectify_stage1, rectify_stage2};

/// Raised by the Dispatcher/HTTP transport (spec.md §4.9) and classified
/// here into a retry/next/raise action.
#[derive(Debug, Clone)]
pub enum ExecutionError {
    ConcurrencyLimit,
    /// 4xx-like, either an embedded error or an HTTP status; no further
    /// candidates are tried.
    ClientError { status: Option<u16>, message: String },
    ThinkingSignature,
    RateLimited { retry_after: Option<Duration> },
    Auth,
    Timeout,
    ConnectionError,
    FormatConversion,
}

#[derive(Debug, Clone, Copy)]
pub enum Action {
    RetrySameCandidate,
    NextCandidate,
    Raise,
}

#[derive(Debug, Default, Clone)]
pub struct RetryState {
    pub rectify_stage: u8,
    pub rectified_once: bool,
}

/// Pure dispatch table: spec.md §4.8's `_handle_candidate_error`.
pub fn classify_action(err: &ExecutionError, state: &RetryState, provider_type: &str) -> Action {
    match err {
        ExecutionError::ConcurrencyLimit => Action::NextCandidate,
        ExecutionError::ClientError { .. } => Action::Raise,
        ExecutionError::ThinkingSignature => {
            if state.rectify_stage == 0 {
                Action::RetrySameCandidate
            } else if state.rectify_stage == 1 && provider_type == "antigravity" {
                Action::RetrySameCandidate
            } else {
                Action::NextCandidate
            }
        }
        ExecutionError::RateLimited { .. } => Action::NextCandidate,
        ExecutionError::Auth => Action::NextCandidate,
        ExecutionError::Timeout | ExecutionError::ConnectionError => Action::NextCandidate,
        ExecutionError::FormatConversion => Action::NextCandidate,
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_total_attempts: u32,
    pub max_retries_per_candidate: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_total_attempts: 20,
            max_retries_per_candidate: 1,
        }
    }
}

#[derive(Debug, Default)]
pub struct SkipPolicy {
    pub excluded_endpoints: HashSet<EndpointId>,
    pub excluded_keys: HashSet<ProviderApiKeyId>,
}

pub struct ExecutionResult<R> {
    pub response: R,
    pub candidate_index: u32,
    pub retry_index: u32,
    pub provider_id: ProviderId,
    pub endpoint_id: EndpointId,
    pub key_id: ProviderApiKeyId,
    pub rectify_stage: u8,
}

#[derive(Debug, Clone)]
pub struct EngineError {
    pub kind: EngineErrorKind,
    pub last_candidate: Option<(ProviderId, EndpointId, ProviderApiKeyId)>,
    pub last_status: Option<u16>,
    pub last_message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// A `CallerErrors`/`UpstreamClientErrors`-class failure on the first
    /// candidate that tried to serve the request; surfaced immediately.
    UpstreamClient { status: Option<u16> },
    /// Every candidate was exhausted without success.
    ProviderNotAvailable,
}

pub struct FailoverEngine<'a> {
    pub health: &'a HealthMonitor,
    pub affinity: &'a CacheAffinityManager,
    pub concurrency: &'a ConcurrencyManager,
    pub usage_store: &'a dyn UsageStore,
    pub request_id: String,
    pub affinity_key: String,
    pub global_model_id: GlobalModelId,
}

impl<'a> FailoverEngine<'a> {
    /// `attempt_func(candidate, body, retry_index)` performs one upstream
    /// attempt; `body` is the (possibly rectified) request body handed to
    /// it. `skip_policy` is mutated in place so callers can inspect it after
    /// exhaustion.
    pub async fn execute<F, Fut, R>(
        &self,
        candidates: Vec<Candidate>,
        mut request_body: JsonValue,
        retry_policy: RetryPolicy,
        skip_policy: &mut SkipPolicy,
        mut attempt_func: F,
    ) -> Result<ExecutionResult<R>, EngineError>
    where
        F: FnMut(&Candidate, &JsonValue, u32) -> Fut,
        Fut: Future<Output = Result<R, ExecutionError>>,
    {
        let mut total_attempts: u32 = 0;
        let mut last_candidate = None;
        let mut last_status = None;
        let mut last_message = None;

        'candidates: for (candidate_index, candidate) in candidates.iter().enumerate() {
            let candidate_index = candidate_index as u32;
            if skip_policy.excluded_endpoints.contains(&candidate.endpoint.id)
                || skip_policy.excluded_keys.contains(&candidate.key.id)
            {
                continue;
            }

            let mut retry_index: u32 = 0;
            let mut retry_state = RetryState::default();
            let sig = candidate.provider_api_format;

            loop {
                if total_attempts >= retry_policy.max_total_attempts {
                    break 'candidates;
                }
                total_attempts += 1;

                self.upsert_candidate_row(candidate, candidate_index, retry_index, CandidateState::Pending)
                    .await;
                let started = std::time::Instant::now();

                match attempt_func(candidate, &request_body, retry_index).await {
                    Ok(response) => {
                        self.health.record_success(candidate.key.id, sig).await;
                        let target = gproxy_provider_core::affinity::AffinityTarget {
                            provider_id: candidate.provider.id,
                            endpoint_id: candidate.endpoint.id,
                            key_id: candidate.key.id,
                            request_count: 0,
                            supports_caching: true,
                        };
                        self.affinity
                            .record_success(&self.affinity_key, sig, self.global_model_id, target, candidate.key.cache_ttl_minutes)
                            .await;
                        self.upsert_candidate_row_with_latency(
                            candidate,
                            candidate_index,
                            retry_index,
                            CandidateState::Success,
                            started.elapsed().as_millis() as u64,
                            retry_state.rectified_once,
                            retry_state.rectify_stage,
                        )
                        .await;
                        return Ok(ExecutionResult {
                            response,
                            candidate_index,
                            retry_index,
                            provider_id: candidate.provider.id,
                            endpoint_id: candidate.endpoint.id,
                            key_id: candidate.key.id,
                            rectify_stage: retry_state.rectify_stage,
                        });
                    }
                    Err(err) => {
                        last_candidate = Some((candidate.provider.id, candidate.endpoint.id, candidate.key.id));
                        let action = classify_action(&err, &retry_state, &candidate.provider.provider_type);

                        match &err {
                            ExecutionError::ConcurrencyLimit => {
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Skipped, None)
                                    .await;
                            }
                            ExecutionError::ClientError { status, message } => {
                                last_status = *status;
                                last_message = Some(message.clone());
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Failed, Some("client_error".into()))
                                    .await;
                                return Err(EngineError {
                                    kind: EngineErrorKind::UpstreamClient { status: *status },
                                    last_candidate,
                                    last_status,
                                    last_message,
                                });
                            }
                            ExecutionError::ThinkingSignature => {
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Failed, Some("thinking_signature".into()))
                                    .await;
                            }
                            ExecutionError::RateLimited { retry_after } => {
                                let observed = self.concurrency.observed_rpm(candidate.key.id, sig, now_epoch_secs()).await;
                                self.health
                                    .shrink_rpm_on_rate_limit(candidate.key.id, sig, observed.max(candidate.key.effective_rpm_limit().unwrap_or(1)))
                                    .await;
                                self.concurrency.record_rate_limited(candidate.key.id, sig).await;
                                self.health
                                    .record_failure(candidate.key.id, sig, FailureKind::RateLimited { retry_after: *retry_after })
                                    .await;
                                last_status = Some(429);
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Failed, Some("rate_limited".into()))
                                    .await;
                            }
                            ExecutionError::Auth => {
                                self.health.record_failure(candidate.key.id, sig, FailureKind::Auth).await;
                                self.affinity.invalidate(&self.affinity_key, sig, self.global_model_id).await;
                                last_status = Some(401);
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Failed, Some("auth".into()))
                                    .await;
                            }
                            ExecutionError::Timeout | ExecutionError::ConnectionError => {
                                self.health.record_failure(candidate.key.id, sig, FailureKind::Generic).await;
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Failed, Some("transient".into()))
                                    .await;
                            }
                            ExecutionError::FormatConversion => {
                                self.mark(candidate, candidate_index, retry_index, CandidateState::Failed, Some("format_conversion".into()))
                                    .await;
                            }
                        }

                        match action {
                            Action::Raise => unreachable!("ClientError already returned above"),
                            Action::NextCandidate => {
                                skip_policy.excluded_keys.insert(candidate.key.id);
                                continue 'candidates;
                            }
                            Action::RetrySameCandidate => {
                                if retry_index + 1 > retry_policy.max_retries_per_candidate + retry_state.rectify_stage as u32 {
                                    continue 'candidates;
                                }
                                let rectified = if retry_state.rectify_stage == 0 {
                                    let did = rectify_stage1(&mut request_body);
                                    retry_state.rectify_stage = 1;
                                    did
                                } else {
                                    match rectify_stage2(&mut request_body, &candidate.provider.provider_type) {
                                        Ok(did) => {
                                            retry_state.rectify_stage = 2;
                                            did
                                        }
                                        Err(_) => false,
                                    }
                                };
                                retry_state.rectified_once = retry_state.rectified_once || rectified;
                                retry_index += 1;
                            }
                        }
                    }
                }
            }
        }

        Err(EngineError {
            kind: EngineErrorKind::ProviderNotAvailable,
            last_candidate,
            last_status,
            last_message,
        })
    }

    async fn upsert_candidate_row(&self, candidate: &Candidate, idx: u32, retry: u32, state: CandidateState) {
        let mut row = RequestCandidate::new(
            self.request_id.clone(),
            idx,
            retry,
            candidate.provider.id,
            candidate.endpoint.id,
            candidate.key.id,
        );
        row.state = state;
        self.usage_store.upsert_candidate(row).await;
    }

    async fn upsert_candidate_row_with_latency(
        &self,
        candidate: &Candidate,
        idx: u32,
        retry: u32,
        state: CandidateState,
        latency_ms: u64,
        rectified: bool,
        rectify_stage: u8,
    ) {
        let mut row = RequestCandidate::new(
            self.request_id.clone(),
            idx,
            retry,
            candidate.provider.id,
            candidate.endpoint.id,
            candidate.key.id,
        );
        row.state = state;
        row.latency_ms = Some(latency_ms);
        row.rectified = rectified;
        row.rectify_stage = rectify_stage;
        self.usage_store.upsert_candidate(row).await;
    }

    async fn mark(&self, candidate: &Candidate, idx: u32, retry: u32, state: CandidateState, error_kind: Option<String>) {
        let mut row = RequestCandidate::new(
            self.request_id.clone(),
            idx,
            retry,
            candidate.provider.id,
            candidate.endpoint.id,
            candidate.key.id,
        );
        row.state = state;
        row.error_kind = error_kind;
        row.skip_reason = if matches!(state, CandidateState::Skipped) {
            Some("concurrency_limit".to_string())
        } else {
            None
        };
        self.usage_store.upsert_candidate(row).await;
    }
}

fn now_epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn concurrency_limit_always_skips_to_next_candidate() {
        let action = classify_action(&ExecutionError::ConcurrencyLimit, &RetryState::default(), "openai");
        assert!(matches!(action, Action::NextCandidate));
    }

    #[test]
    fn client_error_raises_without_further_candidates() {
        let action = classify_action(
            &ExecutionError::ClientError { status: Some(400), message: "bad".into() },
            &RetryState::default(),
            "openai",
        );
        assert!(matches!(action, Action::Raise));
    }

    #[test]
    fn thinking_signature_retries_same_candidate_on_first_occurrence() {
        let action = classify_action(&ExecutionError::ThinkingSignature, &RetryState::default(), "openai");
        assert!(matches!(action, Action::RetrySameCandidate));
    }

    #[test]
    fn thinking_signature_stage2_only_for_antigravity() {
        let state = RetryState { rectify_stage: 1, rectified_once: true };
        assert!(matches!(
            classify_action(&ExecutionError::ThinkingSignature, &state, "antigravity"),
            Action::RetrySameCandidate
        ));
        assert!(matches!(
            classify_action(&ExecutionError::ThinkingSignature, &state, "openai"),
            Action::NextCandidate
        ));
    }

    #[test]
    fn format_conversion_error_never_retries_same_candidate() {
        let action = classify_action(&ExecutionError::FormatConversion, &RetryState::default(), "openai");
        assert!(matches!(action, Action::NextCandidate));
    }
}
