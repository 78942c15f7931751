//! The external collaborator seams the engine consumes (spec.md §1):
//! `ProviderStore` (reads Provider/Endpoint/Key/Model records), `UsageStore`
//! (writes billing), and `ConfigStore` (reads toggles). Kept as traits here
//! so `gproxy-core` depends on an interface rather than on `gproxy-storage`
//! directly, the same separation the existing `UpstreamClient` trait already
//! draws between dispatch logic and the concrete `wreq` transport.

use async_trait::async_trait;

use crate::cost::ModelPricing;
use crate::model::{
    BillingRuleSnapshot, Endpoint, GlobalModel, Model, Provider, ProviderApiKey, ProviderId,
    RequestCandidate, Usage, UsageStatus, VideoTask,
};

#[async_trait]
pub trait ProviderStore: Send + Sync {
    async fn active_providers(&self) -> Vec<Provider>;
    async fn endpoints_for(&self, provider_id: ProviderId) -> Vec<Endpoint>;
    async fn keys_for(&self, provider_id: ProviderId) -> Vec<ProviderApiKey>;
    async fn models_for(&self, provider_id: ProviderId) -> Vec<Model>;
    async fn global_model_by_name(&self, name: &str) -> Option<GlobalModel>;
    async fn billing_rule(&self, rule_id: &str) -> Option<BillingRuleSnapshot>;
    /// Reads from the out-of-scope pricing catalog (spec.md §1); `None`
    /// means the model has no price entry and callers should treat it as
    /// `ModelPricing::free()` rather than fail the request.
    async fn model_pricing(&self, provider_id: ProviderId, provider_model_name: &str) -> Option<ModelPricing>;
}

#[async_trait]
pub trait UsageStore: Send + Sync {
    /// Inserts the pending row; callers rely on `request_id` uniqueness —
    /// later updates rewrite rather than insert duplicates.
    async fn create_pending(&self, usage: Usage);
    /// Refuses to move a terminal state backward; returns whether the
    /// transition was applied.
    async fn update_status(&self, request_id: &str, status: UsageStatus) -> bool;
    async fn record_terminal(&self, usage: Usage);
    async fn upsert_candidate(&self, candidate: RequestCandidate);
    /// Sweeper: marks overdue pending/streaming rows failed with 504.
    async fn cleanup_stale_pending(&self, timeout_minutes: u64) -> u64;

    async fn upsert_video_task(&self, task: VideoTask);
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn provider_priority_mode(&self) -> ProviderPriorityMode;
    async fn scheduling_mode(&self) -> SchedulingMode;
    async fn format_conversion_enabled(&self) -> bool;
    async fn billing_strict_mode(&self) -> bool;
    async fn billing_require_rule(&self) -> bool;
    async fn thinking_rectifier_enabled(&self) -> bool;
    async fn video_poll_interval_seconds(&self) -> u64;
    async fn video_max_poll_count(&self) -> u32;

    /// Global fallback; a `Provider.stream_first_byte_timeout` (spec.md §2)
    /// takes precedence when set.
    async fn stream_first_byte_timeout_ms(&self) -> u64;
    async fn stream_prefetch_lines(&self) -> usize;
    async fn max_prefetch_bytes(&self) -> usize;
    async fn stream_smoothing_enabled(&self) -> bool;
    async fn stream_smoothing_chunk_size(&self) -> usize;
    async fn stream_smoothing_delay_ms(&self) -> u64;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderPriorityMode {
    Provider,
    GlobalKey,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulingMode {
    FixedOrder,
    CacheAffinity,
    LoadBalance,
}
