//! The scheduling data model: Provider, Endpoint, ProviderAPIKey, GlobalModel,
//! Model, Usage, RequestCandidate, BillingRule, VideoTask.
//!
//! Providers own Endpoints, Keys and Models outright; a GlobalModel is shared
//! by many Provider Models (relation, not ownership). These are flat records
//! joined through integer ids rather than a pointer graph, matching how the
//! relational store that backs `ProviderStore` represents them.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::credential::CredentialId;

pub type ProviderId = i64;
pub type EndpointId = i64;
pub type GlobalModelId = i64;

/// `family:kind`, e.g. `openai:chat`, `claude:cli`, `gemini:video`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EndpointSignature {
    pub family: ApiFamily,
    pub kind: EndpointKind,
}

impl EndpointSignature {
    pub const fn new(family: ApiFamily, kind: EndpointKind) -> Self {
        Self { family, kind }
    }
}

impl std::fmt::Display for EndpointSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.family.as_str(), self.kind.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiFamily {
    OpenAI,
    Claude,
    Gemini,
    Other,
}

impl ApiFamily {
    /// Lower sorts first: `openai < claude < gemini < other`, per the
    /// CandidateBuilder endpoint-ordering rule.
    pub fn priority_rank(self) -> u8 {
        match self {
            ApiFamily::OpenAI => 0,
            ApiFamily::Claude => 1,
            ApiFamily::Gemini => 2,
            ApiFamily::Other => 3,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ApiFamily::OpenAI => "openai",
            ApiFamily::Claude => "claude",
            ApiFamily::Gemini => "gemini",
            ApiFamily::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    Chat,
    Cli,
    Video,
    Other,
}

impl EndpointKind {
    pub fn as_str(self) -> &'static str {
        match self {
            EndpointKind::Chat => "chat",
            EndpointKind::Cli => "cli",
            EndpointKind::Video => "video",
            EndpointKind::Other => "other",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingType {
    Standard,
    FreeTier,
}

/// A logical upstream account/organization. Owns Endpoints, Keys and Models.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    /// Lower is better.
    pub provider_priority: i32,
    /// Free-form tag used for provider_type-specific quirks (envelopes,
    /// quota predicates, rectification eligibility).
    pub provider_type: String,
    pub billing_type: BillingType,
    pub monthly_used_usd: f64,
    pub request_timeout_ms: u64,
    pub stream_first_byte_timeout_ms: u64,
    pub enable_format_conversion: bool,
    pub keep_priority_on_conversion: bool,
    pub proxy: Option<String>,
    pub is_active: bool,
}

impl Provider {
    pub fn is_free_tier(&self) -> bool {
        matches!(self.billing_type, BillingType::FreeTier)
    }
}

/// `{enabled, accept_formats[], stream_conversion}` on an Endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FormatAcceptanceConfig {
    pub enabled: bool,
    pub accept_formats: Vec<EndpointSignature>,
    pub stream_conversion: bool,
}

impl Default for FormatAcceptanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            accept_formats: Vec::new(),
            stream_conversion: true,
        }
    }
}

/// A wire-compatible HTTP target under a Provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    pub id: EndpointId,
    pub provider_id: ProviderId,
    pub api_family: ApiFamily,
    pub endpoint_kind: EndpointKind,
    pub base_url: String,
    pub is_active: bool,
    pub format_acceptance: FormatAcceptanceConfig,
    /// Header name -> value overlay applied to every upstream request.
    pub header_rules: HashMap<String, String>,
    /// JSON-pointer-ish body field overlay, opaque to the engine.
    pub body_rules: serde_json::Value,
    pub timeout_ms: Option<u64>,
}

impl Endpoint {
    pub fn signature(&self) -> EndpointSignature {
        EndpointSignature::new(self.api_family, self.endpoint_kind)
    }
}

/// Three-valued capability requirement semantics (spec data invariants).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityRule {
    /// Key must have the capability to serve requests that demand it.
    Required,
    /// Key should only serve requests that demand the capability, else wasted.
    Exclusive,
    /// Key must never serve requests demanding the capability.
    Forbidden,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    ApiKey,
    OAuth,
    VertexAi,
}

pub type ProviderApiKeyId = CredentialId;

/// A credential bound to a Provider, carrying scheduling metadata on top of
/// the raw secret material held by `CredentialPool`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderApiKey {
    pub id: ProviderApiKeyId,
    pub provider_id: ProviderId,
    pub auth_type: AuthType,
    /// Endpoint signatures this key may serve; `None` means all.
    pub api_formats: Option<Vec<EndpointSignature>>,
    /// Global model names this key may serve; empty means all.
    pub allowed_models: Vec<String>,
    pub capabilities: HashMap<String, CapabilityRule>,
    pub internal_priority: i32,
    pub global_priority_by_format: HashMap<EndpointSignature, i32>,
    pub rate_multipliers: HashMap<EndpointSignature, f64>,
    /// `None` means adaptive (use `learned_rpm_limit`).
    pub rpm_limit: Option<u32>,
    pub learned_rpm_limit: u32,
    /// `0` puts every key on this provider into rotation (random) mode.
    pub cache_ttl_minutes: u32,
    /// Provider-type specific quota snapshots (e.g. remaining free-tier
    /// credits), opaque beyond a handful of well-known fields read by
    /// `CandidateBuilder`'s quota check.
    pub upstream_metadata: serde_json::Value,
    pub proxy: Option<String>,
    pub is_active: bool,
}

impl ProviderApiKey {
    pub fn accepts_signature(&self, sig: EndpointSignature) -> bool {
        match &self.api_formats {
            None => true,
            Some(list) => list.contains(&sig),
        }
    }

    pub fn effective_rpm_limit(&self) -> Option<u32> {
        self.rpm_limit.or_else(|| {
            if self.learned_rpm_limit == 0 {
                None
            } else {
                Some(self.learned_rpm_limit)
            }
        })
    }

    pub fn rotation_mode(&self) -> bool {
        self.cache_ttl_minutes == 0
    }

    pub fn capability_allows(&self, cap: &str, demanded: bool) -> bool {
        match self.capabilities.get(cap) {
            Some(CapabilityRule::Required) => demanded,
            Some(CapabilityRule::Forbidden) => !demanded,
            Some(CapabilityRule::Exclusive) | None => true,
        }
    }
}

/// A glob/regex pattern that accepts alternate provider-side model names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelMapping {
    pub pattern: String,
    pub is_regex: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalModelConfig {
    pub model_mappings: Vec<ModelMapping>,
}

/// The canonical model name exposed to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalModel {
    pub id: GlobalModelId,
    pub name: String,
    pub is_active: bool,
    pub supported_capabilities: Vec<String>,
    pub config: GlobalModelConfig,
    pub usage_count: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderModelMapping {
    pub name: String,
    pub api_formats: Vec<EndpointSignature>,
    pub priority: i32,
}

/// A Provider's implementation of a GlobalModel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Model {
    pub provider_id: ProviderId,
    pub global_model_id: GlobalModelId,
    pub provider_model_name: String,
    pub provider_model_mappings: Vec<ProviderModelMapping>,
    /// `None` defers to the endpoint/provider default.
    pub supports_streaming: Option<bool>,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageStatus {
    Pending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl UsageStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            UsageStatus::Completed | UsageStatus::Failed | UsageStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenCounts {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_5m: u64,
    pub cache_creation_1h: u64,
}

impl TokenCounts {
    /// Monotone per-field max, used when merging usage observed across
    /// several chunks of the same stream.
    pub fn merge_max(&mut self, other: &TokenCounts) {
        self.input_tokens = self.input_tokens.max(other.input_tokens);
        self.output_tokens = self.output_tokens.max(other.output_tokens);
        self.cache_read_tokens = self.cache_read_tokens.max(other.cache_read_tokens);
        self.cache_creation_5m = self.cache_creation_5m.max(other.cache_creation_5m);
        self.cache_creation_1h = self.cache_creation_1h.max(other.cache_creation_1h);
    }

    pub fn cache_creation_total(&self) -> u64 {
        self.cache_creation_5m + self.cache_creation_1h
    }
}

/// One row per caller request, keyed by `request_id`. Write-only sink as far
/// as the core is concerned; `UsageStore` owns persistence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Usage {
    pub request_id: String,
    pub caller_identity: String,
    pub wire_format: EndpointSignature,
    pub model_name: String,
    pub provider_id: Option<ProviderId>,
    pub endpoint_id: Option<EndpointId>,
    pub key_id: Option<ProviderApiKeyId>,
    pub tokens: TokenCounts,
    pub response_time_ms: Option<u64>,
    pub first_byte_time_ms: Option<u64>,
    pub status_code: Option<u16>,
    pub status: UsageStatus,
    pub total_cost_usd: f64,
    pub actual_total_cost_usd: f64,
    pub has_format_conversion: bool,
    pub error_message: Option<String>,
    /// Opaque blob containing `perf`, `proxy`, `pool_summary`, and the
    /// candidate trail; the engine only ever appends to it.
    pub request_metadata: serde_json::Value,
}

impl Usage {
    pub fn pending(request_id: impl Into<String>, caller_identity: impl Into<String>, wire_format: EndpointSignature, model_name: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            caller_identity: caller_identity.into(),
            wire_format,
            model_name: model_name.into(),
            provider_id: None,
            endpoint_id: None,
            key_id: None,
            tokens: TokenCounts::default(),
            response_time_ms: None,
            first_byte_time_ms: None,
            status_code: None,
            status: UsageStatus::Pending,
            total_cost_usd: 0.0,
            actual_total_cost_usd: 0.0,
            has_format_conversion: false,
            error_message: None,
            request_metadata: serde_json::json!({}),
        }
    }

    /// Refuses to move a terminal state backward (spec.md §4.11).
    pub fn transition_status(&mut self, next: UsageStatus) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = next;
        true
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CandidateState {
    Available,
    Pending,
    Streaming,
    Success,
    Failed,
    Skipped,
    Cancelled,
}

/// One row per `(request_id, candidate_index, retry_index)`; the audit sink
/// FailoverEngine writes to as it walks the candidate list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestCandidate {
    pub request_id: String,
    pub candidate_index: u32,
    pub retry_index: u32,
    pub provider_id: ProviderId,
    pub endpoint_id: EndpointId,
    pub key_id: ProviderApiKeyId,
    pub state: CandidateState,
    pub latency_ms: Option<u64>,
    pub first_byte_time_ms: Option<u64>,
    pub rectified: bool,
    pub rectify_stage: u8,
    pub skip_reason: Option<String>,
    pub error_kind: Option<String>,
}

impl RequestCandidate {
    pub fn new(
        request_id: impl Into<String>,
        candidate_index: u32,
        retry_index: u32,
        provider_id: ProviderId,
        endpoint_id: EndpointId,
        key_id: ProviderApiKeyId,
    ) -> Self {
        Self {
            request_id: request_id.into(),
            candidate_index,
            retry_index,
            provider_id,
            endpoint_id,
            key_id,
            state: CandidateState::Available,
            latency_ms: None,
            first_byte_time_ms: None,
            rectified: false,
            rectify_stage: 0,
            skip_reason: None,
            error_kind: None,
        }
    }
}

/// A frozen-at-submit billing rule for async/video tasks (spec.md §4.11).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BillingRuleSnapshot {
    pub rule_id: String,
    /// A small arithmetic expression over named dimensions, e.g.
    /// `"duration_seconds * price_per_second"`.
    pub expression: String,
    pub variables: HashMap<String, f64>,
    pub dimension_mappings: HashMap<String, String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoTaskStatus {
    Submitted,
    Polling,
    Completed,
    Failed,
}

/// Minimal submit/poll/billing lifecycle for async video-generation tasks.
/// Downloading the resulting artifact to the caller is out of scope; only
/// the billing-relevant lifecycle is modeled here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoTask {
    pub request_id: String,
    pub provider_id: ProviderId,
    pub endpoint_id: EndpointId,
    pub operation_name: String,
    pub status: VideoTaskStatus,
    pub poll_count: u32,
    pub billing_rule: BillingRuleSnapshot,
    pub collected_dimensions: HashMap<String, f64>,
    pub total_cost_usd: f64,
}

impl VideoTask {
    /// Evaluate `billing_rule.expression` against `collected_dimensions`.
    /// In strict mode a missing required dimension fails the task and voids
    /// cost rather than guessing.
    pub fn finalize(&mut self, strict_mode: bool) {
        match evaluate_billing_expression(&self.billing_rule, &self.collected_dimensions) {
            Some(cost) => {
                self.total_cost_usd = cost;
                self.status = VideoTaskStatus::Completed;
            }
            None => {
                self.total_cost_usd = 0.0;
                if strict_mode {
                    self.status = VideoTaskStatus::Failed;
                }
            }
        }
    }
}

/// Supports a single `a * b [* c ...]` or `a + b` product/sum of named
/// dimensions and rule variables; anything more exotic than that is out of
/// scope for the core (the pricing catalog editor owns real expression
/// authoring).
fn evaluate_billing_expression(
    rule: &BillingRuleSnapshot,
    dims: &HashMap<String, f64>,
) -> Option<f64> {
    let lookup = |name: &str| -> Option<f64> {
        dims.get(name)
            .copied()
            .or_else(|| rule.variables.get(name).copied())
    };
    let is_product = rule.expression.contains('*');
    let is_sum = rule.expression.contains('+');
    let sep: &[char] = if is_product && !is_sum {
        &['*']
    } else if is_sum && !is_product {
        &['+']
    } else {
        &['*']
    };
    let mut acc: Option<f64> = None;
    for term in rule.expression.split(sep) {
        let value = lookup(term.trim())?;
        acc = Some(match (acc, is_sum && !is_product) {
            (None, _) => value,
            (Some(prev), true) => prev + value,
            (Some(prev), false) => prev * value,
        });
    }
    acc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_status_never_regresses_from_terminal() {
        let mut usage = Usage::pending("r1", "caller-1", EndpointSignature::new(ApiFamily::OpenAI, EndpointKind::Chat), "gm-x");
        assert!(usage.transition_status(UsageStatus::Streaming));
        assert!(usage.transition_status(UsageStatus::Completed));
        assert!(!usage.transition_status(UsageStatus::Failed));
        assert_eq!(usage.status, UsageStatus::Completed);
    }

    #[test]
    fn token_counts_merge_is_monotone_max() {
        let mut total = TokenCounts {
            input_tokens: 10,
            output_tokens: 5,
            ..Default::default()
        };
        total.merge_max(&TokenCounts {
            input_tokens: 8,
            output_tokens: 12,
            ..Default::default()
        });
        assert_eq!(total.input_tokens, 10);
        assert_eq!(total.output_tokens, 12);
    }

    #[test]
    fn capability_required_rejects_when_not_demanded_key_lacks() {
        let mut caps = HashMap::new();
        caps.insert("vision".to_string(), CapabilityRule::Required);
        let key = sample_key(caps);
        assert!(key.capability_allows("vision", true));
    }

    #[test]
    fn capability_forbidden_rejects_when_demanded() {
        let mut caps = HashMap::new();
        caps.insert("vision".to_string(), CapabilityRule::Forbidden);
        let key = sample_key(caps);
        assert!(!key.capability_allows("vision", true));
        assert!(key.capability_allows("vision", false));
    }

    #[test]
    fn billing_rule_product_expression_evaluates() {
        let rule = BillingRuleSnapshot {
            rule_id: "video-v1".to_string(),
            expression: "duration_seconds * price_per_second".to_string(),
            variables: HashMap::from([("price_per_second".to_string(), 0.05)]),
            dimension_mappings: HashMap::new(),
        };
        let dims = HashMap::from([("duration_seconds".to_string(), 12.0)]);
        assert_eq!(evaluate_billing_expression(&rule, &dims), Some(0.6));
    }

    #[test]
    fn billing_rule_missing_dimension_fails_strict() {
        let rule = BillingRuleSnapshot {
            rule_id: "video-v1".to_string(),
            expression: "duration_seconds * price_per_second".to_string(),
            variables: HashMap::from([("price_per_second".to_string(), 0.05)]),
            dimension_mappings: HashMap::new(),
        };
        let mut task = VideoTask {
            request_id: "r1".to_string(),
            provider_id: 1,
            endpoint_id: 1,
            operation_name: "op/1".to_string(),
            status: VideoTaskStatus::Polling,
            poll_count: 3,
            billing_rule: rule,
            collected_dimensions: HashMap::new(),
            total_cost_usd: 0.0,
        };
        task.finalize(true);
        assert_eq!(task.status, VideoTaskStatus::Failed);
        assert_eq!(task.total_cost_usd, 0.0);
    }

    fn sample_key(capabilities: HashMap<String, CapabilityRule>) -> ProviderApiKey {
        ProviderApiKey {
            id: 1,
            provider_id: 1,
            auth_type: AuthType::ApiKey,
            api_formats: None,
            allowed_models: Vec::new(),
            capabilities,
            internal_priority: 0,
            global_priority_by_format: HashMap::new(),
            rate_multipliers: HashMap::new(),
            rpm_limit: None,
            learned_rpm_limit: 0,
            cache_ttl_minutes: 15,
            upstream_metadata: serde_json::json!({}),
            proxy: None,
            is_active: true,
        }
    }
}
