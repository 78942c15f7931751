//! Adapts the teacher's runtime state (`AppState`/`ProviderRuntime`/
//! `CredentialPool`) to the spec engine's collaborator traits
//! (`gproxy_provider_core::store::{ProviderStore, UsageStore, ConfigStore}`),
//! the same way `UpstreamClient` (`upstream_client.rs`) already adapts
//! `wreq` to the teacher's own transport seam. `proxy_engine` builds one
//! `ProxyProviderStore` per request, scoped to the single named provider the
//! caller asked for — there is no persisted Endpoint/Model/GlobalModel table
//! in `gproxy-storage` to read a real cross-provider catalog from (see
//! `DESIGN.md`), so this synthesizes the one endpoint/model/key set the
//! teacher's provider-pinned wire protocol already assumes, and lets
//! `CandidateBuilder`/`Scheduler` order the credentials within it.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tokio::time::Instant;

use gproxy_provider_core::cost::ModelPricing;
use gproxy_provider_core::model::{
    AuthType, BillingRuleSnapshot, BillingType, Endpoint, EndpointKind, EndpointSignature,
    FormatAcceptanceConfig, GlobalModel, GlobalModelConfig, GlobalModelId, Model, Provider,
    ProviderApiKey, ProviderApiKeyId, ProviderId, RequestCandidate, Usage, UsageStatus, VideoTask,
};
use gproxy_provider_core::store::{ConfigStore, ProviderPriorityMode, ProviderStore, SchedulingMode, UsageStore};

/// A single-provider, single-model `ProviderStore` view built fresh for each
/// `handle_protocol` request. `global_model_id` is a request-local constant
/// (`1`) — it never needs to agree with any other request's id because
/// nothing persists across `ProxyProviderStore` instances.
pub struct ProxyProviderStore {
    provider: Provider,
    endpoint: Endpoint,
    keys: Vec<ProviderApiKey>,
    model_name: String,
    global_model_id: GlobalModelId,
}

impl ProxyProviderStore {
    pub fn new(
        provider_id: ProviderId,
        provider_name: &str,
        provider_type: &str,
        client_sig: EndpointSignature,
        model_name: &str,
        key_ids: Vec<ProviderApiKeyId>,
    ) -> Self {
        let provider = Provider {
            id: provider_id,
            name: provider_name.to_string(),
            provider_priority: 0,
            provider_type: provider_type.to_string(),
            billing_type: BillingType::Standard,
            monthly_used_usd: 0.0,
            request_timeout_ms: 0,
            stream_first_byte_timeout_ms: 0,
            enable_format_conversion: false,
            keep_priority_on_conversion: false,
            proxy: None,
            is_active: true,
        };
        let endpoint = Endpoint {
            id: 1,
            provider_id,
            api_family: client_sig.family,
            endpoint_kind: client_sig.kind,
            base_url: String::new(),
            is_active: true,
            format_acceptance: FormatAcceptanceConfig::default(),
            header_rules: HashMap::new(),
            body_rules: serde_json::json!({}),
            timeout_ms: None,
        };
        let keys = key_ids
            .into_iter()
            .map(|id| ProviderApiKey {
                id,
                provider_id,
                auth_type: AuthType::ApiKey,
                api_formats: None,
                allowed_models: Vec::new(),
                capabilities: HashMap::new(),
                internal_priority: 0,
                global_priority_by_format: HashMap::new(),
                rate_multipliers: HashMap::new(),
                rpm_limit: None,
                learned_rpm_limit: 0,
                // No persisted per-key TTL to read; proxy_engine's live success
                // path uses its own DEFAULT_CACHE_AFFINITY_TTL_MINUTES instead
                // of this field.
                cache_ttl_minutes: 0,
                upstream_metadata: serde_json::json!({}),
                proxy: None,
                is_active: true,
            })
            .collect();
        Self {
            provider,
            endpoint,
            keys,
            model_name: model_name.to_string(),
            global_model_id: 1,
        }
    }
}

#[async_trait]
impl ProviderStore for ProxyProviderStore {
    async fn active_providers(&self) -> Vec<Provider> {
        vec![self.provider.clone()]
    }

    async fn endpoints_for(&self, provider_id: ProviderId) -> Vec<Endpoint> {
        if provider_id == self.provider.id { vec![self.endpoint.clone()] } else { Vec::new() }
    }

    async fn keys_for(&self, provider_id: ProviderId) -> Vec<ProviderApiKey> {
        if provider_id == self.provider.id { self.keys.clone() } else { Vec::new() }
    }

    async fn models_for(&self, provider_id: ProviderId) -> Vec<Model> {
        if provider_id != self.provider.id {
            return Vec::new();
        }
        vec![Model {
            provider_id: self.provider.id,
            global_model_id: self.global_model_id,
            provider_model_name: self.model_name.clone(),
            provider_model_mappings: Vec::new(),
            supports_streaming: None,
            is_active: true,
        }]
    }

    async fn global_model_by_name(&self, name: &str) -> Option<GlobalModel> {
        if name != self.model_name {
            return None;
        }
        Some(GlobalModel {
            id: self.global_model_id,
            name: name.to_string(),
            is_active: true,
            supported_capabilities: Vec::new(),
            config: GlobalModelConfig::default(),
            usage_count: 0,
        })
    }

    async fn billing_rule(&self, _rule_id: &str) -> Option<BillingRuleSnapshot> {
        None
    }

    /// No pricing catalog is persisted anywhere in `gproxy-storage` (see
    /// `DESIGN.md`); callers treat `None` as `ModelPricing::free()`, which is
    /// the documented contract on this trait method.
    async fn model_pricing(&self, _provider_id: ProviderId, _provider_model_name: &str) -> Option<ModelPricing> {
        None
    }
}

/// Constant scheduling/billing toggles — there is no persisted
/// `GlobalConfig` field for any of these yet (see `DESIGN.md`), so this
/// picks the most conservative value per toggle: ordering by provider
/// priority, no forced conversion, billing left permissive (strict mode and
/// rule-required would reject every request since no billing rules are
/// ever registered), rectification left off since `handle_protocol` hand-
/// replicates `classify_action`'s retry decisions inline rather than calling
/// `FailoverEngine::execute` (see DESIGN.md).
pub struct ProxyConfigStore;

#[async_trait]
impl ConfigStore for ProxyConfigStore {
    async fn provider_priority_mode(&self) -> ProviderPriorityMode {
        ProviderPriorityMode::Provider
    }
    async fn scheduling_mode(&self) -> SchedulingMode {
        SchedulingMode::FixedOrder
    }
    async fn format_conversion_enabled(&self) -> bool {
        false
    }
    async fn billing_strict_mode(&self) -> bool {
        false
    }
    async fn billing_require_rule(&self) -> bool {
        false
    }
    async fn thinking_rectifier_enabled(&self) -> bool {
        false
    }
    async fn video_poll_interval_seconds(&self) -> u64 {
        10
    }
    async fn video_max_poll_count(&self) -> u32 {
        60
    }
    async fn stream_first_byte_timeout_ms(&self) -> u64 {
        15_000
    }
    async fn stream_prefetch_lines(&self) -> usize {
        0
    }
    async fn max_prefetch_bytes(&self) -> usize {
        0
    }
    async fn stream_smoothing_enabled(&self) -> bool {
        false
    }
    async fn stream_smoothing_chunk_size(&self) -> usize {
        0
    }
    async fn stream_smoothing_delay_ms(&self) -> u64 {
        0
    }
}

/// `UsageStore` backed by process memory, scoped to the lifetime of one
/// `ProxyEngine` — mirrors `CredentialPool`'s own `RwLock<HashMap<..>>`
/// bookkeeping rather than adding a `gproxy-storage` dependency for a table
/// that doesn't exist yet (see `DESIGN.md`).
pub struct InMemoryUsageStore {
    pending: RwLock<HashMap<String, Usage>>,
    pending_since: RwLock<HashMap<String, Instant>>,
    terminal: RwLock<Vec<Usage>>,
    candidates: RwLock<Vec<RequestCandidate>>,
    video_tasks: RwLock<HashMap<String, VideoTask>>,
}

impl Default for InMemoryUsageStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryUsageStore {
    pub fn new() -> Self {
        Self {
            pending: RwLock::new(HashMap::new()),
            pending_since: RwLock::new(HashMap::new()),
            terminal: RwLock::new(Vec::new()),
            candidates: RwLock::new(Vec::new()),
            video_tasks: RwLock::new(HashMap::new()),
        }
    }

    pub async fn terminal_snapshot(&self) -> Vec<Usage> {
        self.terminal.read().await.clone()
    }
}

#[async_trait]
impl UsageStore for InMemoryUsageStore {
    async fn create_pending(&self, usage: Usage) {
        let request_id = usage.request_id.clone();
        self.pending.write().await.insert(request_id.clone(), usage);
        self.pending_since.write().await.insert(request_id, Instant::now());
    }

    async fn update_status(&self, request_id: &str, status: UsageStatus) -> bool {
        let mut pending = self.pending.write().await;
        match pending.get_mut(request_id) {
            Some(usage) => usage.transition_status(status),
            None => false,
        }
    }

    async fn record_terminal(&self, usage: Usage) {
        let request_id = usage.request_id.clone();
        self.pending.write().await.remove(&request_id);
        self.pending_since.write().await.remove(&request_id);
        self.terminal.write().await.push(usage);
    }

    async fn upsert_candidate(&self, candidate: RequestCandidate) {
        self.candidates.write().await.push(candidate);
    }

    async fn cleanup_stale_pending(&self, timeout_minutes: u64) -> u64 {
        let cutoff = Duration::from_secs(timeout_minutes * 60);
        let stale: Vec<String> = {
            let since = self.pending_since.read().await;
            since
                .iter()
                .filter(|(_, started)| started.elapsed() >= cutoff)
                .map(|(id, _)| id.clone())
                .collect()
        };
        let mut pending = self.pending.write().await;
        let mut since = self.pending_since.write().await;
        let mut terminal = self.terminal.write().await;
        let mut count = 0u64;
        for request_id in stale {
            if let Some(mut usage) = pending.remove(&request_id) {
                usage.status_code = Some(504);
                usage.error_message = Some("stale pending request".to_string());
                usage.transition_status(UsageStatus::Failed);
                terminal.push(usage);
                count += 1;
            }
            since.remove(&request_id);
        }
        count
    }

    async fn upsert_video_task(&self, task: VideoTask) {
        self.video_tasks.write().await.insert(task.request_id.clone(), task);
    }
}
