//! `Telemetry` (spec.md §4.11, named `UsageService` there): the pending ->
//! streaming -> completed|failed|cancelled lifecycle plus strict-mode cost
//! calculation, as its own collaborator rather than inlined into
//! `Dispatcher`/`FailoverEngine` — the same split the original draws in
//! `src/api/handlers/base/stream_telemetry.py`, a mixin the stream handler
//! calls into for usage-status side effects rather than folding them into
//! the SSE loop. `Dispatcher` currently does its own minimal
//! create/transition/record_terminal calls against `UsageStore` directly
//! (see `DESIGN.md`); this module is the named facade spec.md §4.11 asks
//! for, built standalone and tested against a fixture store so it can be
//! adopted by `Dispatcher` (or by whatever eventually drives `proxy_engine`)
//! without guessing at call sites this exercise can't verify by compiling.

use gproxy_provider_core::cost::{compute_cost, ModelPricing};
use gproxy_provider_core::model::{
    EndpointId, EndpointSignature, ProviderApiKeyId, ProviderId, TokenCounts, Usage, UsageStatus,
};
use gproxy_provider_core::store::UsageStore;

pub struct Telemetry<'a> {
    pub usage_store: &'a dyn UsageStore,
}

/// Fields only known once a candidate has been picked, passed to
/// `update_usage_status` in one call rather than several partial updates
/// (spec.md §4.11's own parameter list).
#[derive(Debug, Clone, Default)]
pub struct CandidateContext {
    pub provider_id: Option<ProviderId>,
    pub endpoint_id: Option<EndpointId>,
    pub key_id: Option<ProviderApiKeyId>,
    pub first_byte_time_ms: Option<u64>,
    pub api_format: Option<EndpointSignature>,
    pub has_format_conversion: bool,
}

impl<'a> Telemetry<'a> {
    pub fn new(usage_store: &'a dyn UsageStore) -> Self {
        Self { usage_store }
    }

    pub async fn create_pending_usage(
        &self,
        request_id: impl Into<String>,
        caller_identity: impl Into<String>,
        wire_format: EndpointSignature,
        model_name: impl Into<String>,
    ) -> Usage {
        let usage = Usage::pending(request_id, caller_identity, wire_format, model_name);
        self.usage_store.create_pending(usage.clone()).await;
        usage
    }

    /// Refuses to move a terminal state backward — delegates straight to
    /// `UsageStore::update_status`, which already encodes that invariant.
    pub async fn update_usage_status(&self, request_id: &str, status: UsageStatus) -> bool {
        self.usage_store.update_status(request_id, status).await
    }

    pub fn apply_candidate_context(usage: &mut Usage, ctx: CandidateContext) {
        usage.provider_id = ctx.provider_id;
        usage.endpoint_id = ctx.endpoint_id;
        usage.key_id = ctx.key_id;
        usage.first_byte_time_ms = ctx.first_byte_time_ms;
        usage.has_format_conversion = ctx.has_format_conversion;
        if let Some(fmt) = ctx.api_format {
            usage.wire_format = fmt;
        }
    }

    /// Terminal success transition. Computes both cost fields from
    /// `tokens`/`pricing`/`rate_multiplier`/`is_free_tier` (spec.md §4.11's
    /// cost model) before handing the row to `UsageStore::record_terminal`.
    pub async fn record_success(
        &self,
        mut usage: Usage,
        tokens: TokenCounts,
        response_time_ms: u64,
        pricing: &ModelPricing,
        rate_multiplier: f64,
        is_free_tier: bool,
    ) -> Usage {
        usage.tokens = tokens;
        usage.response_time_ms = Some(response_time_ms);
        usage.status_code = Some(200);
        usage.transition_status(UsageStatus::Completed);
        let cost = compute_cost(&tokens, pricing, rate_multiplier, is_free_tier);
        usage.total_cost_usd = cost.total_cost_usd;
        usage.actual_total_cost_usd = cost.actual_total_cost_usd;
        self.usage_store.record_terminal(usage.clone()).await;
        usage
    }

    /// Terminal failure transition. spec.md §4.11: "Failed requests MUST
    /// NOT include `request_cost`" — cost fields are left at `0.0` rather
    /// than computed, regardless of how many tokens a partial response body
    /// may have carried.
    pub async fn record_failure(&self, mut usage: Usage, status_code: Option<u16>, message: Option<String>) -> Usage {
        usage.status_code = status_code;
        usage.error_message = message;
        usage.total_cost_usd = 0.0;
        usage.actual_total_cost_usd = 0.0;
        usage.transition_status(UsageStatus::Failed);
        self.usage_store.record_terminal(usage.clone()).await;
        usage
    }

    /// Terminal cancellation (client disconnect, status 499, or server-side
    /// cancellation). Open Question #2's resolution: billed for whatever
    /// partial output the stream had already produced, not zeroed like a
    /// failure — `tokens` here is `StreamPipeline`'s accumulated partial
    /// usage, so this still runs `compute_cost`.
    pub async fn record_cancelled(
        &self,
        mut usage: Usage,
        tokens: TokenCounts,
        status_code: u16,
        pricing: &ModelPricing,
        rate_multiplier: f64,
        is_free_tier: bool,
    ) -> Usage {
        usage.tokens = tokens;
        usage.status_code = Some(status_code);
        let cost = compute_cost(&tokens, pricing, rate_multiplier, is_free_tier);
        usage.total_cost_usd = cost.total_cost_usd;
        usage.actual_total_cost_usd = cost.actual_total_cost_usd;
        usage.transition_status(UsageStatus::Cancelled);
        self.usage_store.record_terminal(usage.clone()).await;
        usage
    }

    pub async fn cleanup_stale_pending_requests(&self, timeout_minutes: u64) -> u64 {
        self.usage_store.cleanup_stale_pending(timeout_minutes).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use gproxy_provider_core::model::{ApiFamily, EndpointKind, RequestCandidate, VideoTask};
    use std::sync::Mutex;

    struct FixtureStore {
        pending: Mutex<Vec<Usage>>,
        terminal: Mutex<Vec<Usage>>,
    }

    impl FixtureStore {
        fn new() -> Self {
            Self { pending: Mutex::new(Vec::new()), terminal: Mutex::new(Vec::new()) }
        }
    }

    #[async_trait]
    impl UsageStore for FixtureStore {
        async fn create_pending(&self, usage: Usage) {
            self.pending.lock().unwrap().push(usage);
        }
        async fn update_status(&self, _request_id: &str, _status: UsageStatus) -> bool {
            true
        }
        async fn record_terminal(&self, usage: Usage) {
            self.terminal.lock().unwrap().push(usage);
        }
        async fn upsert_candidate(&self, _candidate: RequestCandidate) {}
        async fn cleanup_stale_pending(&self, _timeout_minutes: u64) -> u64 {
            0
        }
        async fn upsert_video_task(&self, _task: VideoTask) {}
    }

    fn sig() -> EndpointSignature {
        EndpointSignature::new(ApiFamily::Claude, EndpointKind::Chat)
    }

    fn pricing() -> ModelPricing {
        ModelPricing {
            input_per_million: 3.0,
            output_per_million: 15.0,
            cache_read_per_million: 0.0,
            cache_creation_5m_per_million: 0.0,
            cache_creation_1h_per_million: 0.0,
            price_per_request: None,
        }
    }

    #[tokio::test]
    async fn create_pending_inserts_and_returns_the_row() {
        let store = FixtureStore::new();
        let telemetry = Telemetry::new(&store);
        let usage = telemetry.create_pending_usage("req-1", "caller-a", sig(), "claude-3").await;
        assert_eq!(usage.status, UsageStatus::Pending);
        assert_eq!(store.pending.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_success_computes_cost_and_marks_completed() {
        let store = FixtureStore::new();
        let telemetry = Telemetry::new(&store);
        let usage = Usage::pending("req-2", "caller-a", sig(), "claude-3");
        let tokens = TokenCounts { input_tokens: 1_000_000, output_tokens: 1_000_000, ..Default::default() };
        let got = telemetry.record_success(usage, tokens, 120, &pricing(), 1.0, false).await;
        assert_eq!(got.status, UsageStatus::Completed);
        assert!((got.total_cost_usd - 18.0).abs() < 1e-9);
        assert_eq!(got.actual_total_cost_usd, got.total_cost_usd);
        assert_eq!(store.terminal.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn record_failure_never_carries_a_cost() {
        let store = FixtureStore::new();
        let telemetry = Telemetry::new(&store);
        let usage = Usage::pending("req-3", "caller-a", sig(), "claude-3");
        let got = telemetry.record_failure(usage, Some(502), Some("bad gateway".into())).await;
        assert_eq!(got.status, UsageStatus::Failed);
        assert_eq!(got.total_cost_usd, 0.0);
        assert_eq!(got.actual_total_cost_usd, 0.0);
    }

    #[tokio::test]
    async fn record_cancelled_bills_partial_tokens_not_zero() {
        let store = FixtureStore::new();
        let telemetry = Telemetry::new(&store);
        let usage = Usage::pending("req-4", "caller-a", sig(), "claude-3");
        let tokens = TokenCounts { input_tokens: 100_000, output_tokens: 50_000, ..Default::default() };
        let got = telemetry.record_cancelled(usage, tokens, 499, &pricing(), 1.0, false).await;
        assert_eq!(got.status, UsageStatus::Cancelled);
        assert!(got.total_cost_usd > 0.0);
        assert_eq!(got.status_code, Some(499));
    }

    #[tokio::test]
    async fn terminal_status_cannot_be_overwritten_once_set() {
        let mut usage = Usage::pending("req-5", "caller-a", sig(), "claude-3");
        assert!(usage.transition_status(UsageStatus::Completed));
        assert!(!usage.transition_status(UsageStatus::Failed));
        assert_eq!(usage.status, UsageStatus::Completed);
    }
}
