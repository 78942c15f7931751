//! Top-level control flow (spec.md §4.9): resolve the restriction set, build
//! candidates, order them, and hand the ordered list to `FailoverEngine`,
//! recording a `Usage` row throughout. Generic over `AttemptExecutor` so it
//! can be driven by a mock in tests and by the real upstream transport in
//! `proxy_engine` without this module knowing about `wreq` at all.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use gproxy_provider_core::affinity::CacheAffinityManager;
use gproxy_provider_core::concurrency::ConcurrencyManager;
use gproxy_provider_core::cost::ModelPricing;
use gproxy_provider_core::health::HealthMonitor;
use gproxy_provider_core::model::{GlobalModelId, ProviderApiKeyId, TokenCounts, Usage};
use gproxy_provider_core::store::{ConfigStore, ProviderStore, UsageStore};

use crate::telemetry::Telemetry;

use super::candidate::{Candidate, CandidateBuilder, CandidateError, CandidateRequest};
use super::failover::{EngineError, EngineErrorKind, ExecutionError, FailoverEngine, RetryPolicy, SkipPolicy};
use super::scheduler::Scheduler;

/// What one successful attempt yields: the business response plus the
/// token/timing facts `Telemetry` needs to price it (spec.md §4.11).
pub struct AttemptOutcome<R> {
    pub response: R,
    pub tokens: TokenCounts,
    pub response_time_ms: u64,
}

/// One upstream attempt against a chosen candidate. Implemented by the real
/// transport in `proxy_engine`; a test double just needs to satisfy this.
#[async_trait]
pub trait AttemptExecutor: Send + Sync {
    type Response: Send;

    async fn attempt(
        &self,
        candidate: &Candidate,
        body: &JsonValue,
        retry_index: u32,
    ) -> Result<AttemptOutcome<Self::Response>, ExecutionError>;
}

#[derive(Debug, Clone)]
pub enum DispatchError {
    ModelNotSupported,
    UpstreamClient { status: Option<u16>, message: Option<String> },
    ProviderNotAvailable,
}

impl From<CandidateError> for DispatchError {
    fn from(_: CandidateError) -> Self {
        DispatchError::ModelNotSupported
    }
}

impl From<EngineError> for DispatchError {
    fn from(err: EngineError) -> Self {
        match err.kind {
            EngineErrorKind::UpstreamClient { status } => DispatchError::UpstreamClient {
                status,
                message: err.last_message,
            },
            EngineErrorKind::ProviderNotAvailable => DispatchError::ProviderNotAvailable,
        }
    }
}

pub struct Dispatcher<'a> {
    pub provider_store: &'a dyn ProviderStore,
    pub usage_store: &'a dyn UsageStore,
    pub config_store: &'a dyn ConfigStore,
    pub health: &'a HealthMonitor,
    pub affinity: &'a CacheAffinityManager,
    pub concurrency: &'a ConcurrencyManager,
}

pub struct DispatchRequest {
    pub request_id: String,
    pub caller_identity: String,
    pub affinity_key: String,
    pub global_model_id: GlobalModelId,
    pub candidate_request: CandidateRequest,
    pub body: JsonValue,
}

impl<'a> Dispatcher<'a> {
    pub async fn execute<E: AttemptExecutor>(
        &self,
        req: DispatchRequest,
        executor: &E,
    ) -> Result<E::Response, DispatchError> {
        let mut usage = Usage::pending(
            req.request_id.clone(),
            req.caller_identity.clone(),
            req.candidate_request.client_sig,
            req.candidate_request.model_name.clone(),
        );
        self.usage_store.create_pending(usage.clone()).await;

        let built = CandidateBuilder::build(self.provider_store, self.health, &req.candidate_request).await;
        let candidates = match built {
            Ok(c) => c,
            Err(e) => {
                usage.transition_status(UsageStatus::Failed);
                usage.error_message = Some("model not supported".into());
                self.usage_store.record_terminal(usage).await;
                return Err(e.into());
            }
        };

        let priority_mode = self.config_store.provider_priority_mode().await;
        let scheduling_mode = self.config_store.scheduling_mode().await;
        let ordered = Scheduler::order(candidates, priority_mode, &req.affinity_key);
        let target = self
            .affinity
            .lookup(&req.affinity_key, req.candidate_request.client_sig, req.global_model_id)
            .await;
        let target_unhealthy = match &target {
            Some(t) => !self.health.check(t.key_id, req.candidate_request.client_sig).await.0,
            None => false,
        };
        let ordered = Scheduler::apply_mode(scheduling_mode, ordered, false);
        let ordered = Scheduler::promote_affinity(ordered, target.as_ref(), target_unhealthy);

        // Looked up by key_id once a candidate wins, so the terminal cost
        // calculation knows which provider/pricing/rate_multiplier applied.
        let candidate_lookup: HashMap<ProviderApiKeyId, Candidate> =
            ordered.iter().map(|c| (c.key.id, c.clone())).collect();
        let model_name = req.candidate_request.model_name.clone();

        let engine = FailoverEngine {
            health: self.health,
            affinity: self.affinity,
            concurrency: self.concurrency,
            usage_store: self.usage_store,
            request_id: req.request_id.clone(),
            affinity_key: req.affinity_key.clone(),
            global_model_id: req.global_model_id,
        };
        let mut skip_policy = SkipPolicy::default();
        let retry_policy = RetryPolicy::default();
        let telemetry = Telemetry::new(self.usage_store);

        match engine
            .execute(ordered, req.body, retry_policy, &mut skip_policy, |candidate, body, retry_index| {
                executor.attempt(candidate, body, retry_index)
            })
            .await
        {
            Ok(result) => {
                usage.provider_id = Some(result.provider_id);
                usage.endpoint_id = Some(result.endpoint_id);
                usage.key_id = Some(result.key_id);
                let (pricing, rate_multiplier, is_free_tier) = match candidate_lookup.get(&result.key_id) {
                    Some(candidate) => {
                        let pricing = self
                            .provider_store
                            .model_pricing(candidate.provider.id, &model_name)
                            .await
                            .unwrap_or(ModelPricing::free());
                        let rate_multiplier = candidate
                            .key
                            .rate_multipliers
                            .get(&candidate.provider_api_format)
                            .copied()
                            .unwrap_or(1.0);
                        (pricing, rate_multiplier, candidate.provider.is_free_tier())
                    }
                    None => (ModelPricing::free(), 1.0, false),
                };
                let outcome = result.response;
                telemetry
                    .record_success(usage, outcome.tokens, outcome.response_time_ms, &pricing, rate_multiplier, is_free_tier)
                    .await;
                Ok(outcome.response)
            }
            Err(err) => {
                if let Some((provider_id, endpoint_id, key_id)) = err.last_candidate {
                    usage.provider_id = Some(provider_id);
                    usage.endpoint_id = Some(endpoint_id);
                    usage.key_id = Some(key_id);
                }
                telemetry.record_failure(usage, err.last_status, err.last_message.clone()).await;
                Err(err.into())
            }
        }
    }
}
