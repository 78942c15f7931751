//! Core provider abstractions for gproxy.
//!
//! This crate intentionally does **not** depend on axum or any concrete HTTP client.
//! Provider implementations should construct `UpstreamHttpRequest` (and optional
//! internal requests like `upstream_usage`), while a higher layer performs IO.

pub mod affinity;
pub mod cache;
pub mod concurrency;
pub mod config;
pub mod cost;
pub mod credential;
pub mod errors;
pub mod events;
pub mod headers;
pub mod health;
pub mod model;
pub mod provider;
pub mod registry;
pub mod store;

pub use config::{
    AIStudioConfig, AntigravityConfig, ClaudeCodeConfig, ClaudeCodePreludeText, ClaudeConfig,
    CodexConfig, CountTokensMode, CustomProviderConfig, DeepSeekConfig, DispatchRule,
    DispatchTable, GeminiCliConfig, ModelTable, NvidiaConfig, OpenAIConfig, OperationKind,
    ProviderConfig, VertexConfig, VertexExpressConfig,
};
pub use credential::{
    AcquireError, Credential, CredentialId, CredentialPool, CredentialState, UnavailableReason,
};
pub use errors::{ProviderError, ProviderResult};
pub use events::{
    DownstreamEvent, Event, EventHub, EventSink, ModelUnavailableEndEvent,
    ModelUnavailableStartEvent, OperationalEvent, TerminalEventSink, UnavailableEndEvent,
    UnavailableStartEvent, UpstreamEvent,
};
pub use headers::{Headers, header_get, header_remove, header_set};
pub use provider::{
    AuthRetryAction, HttpMethod, OAuthCallbackRequest, OAuthCallbackResult, OAuthCredential,
    OAuthStartRequest, UpstreamBody, UpstreamCtx, UpstreamHttpRequest, UpstreamHttpResponse,
    UpstreamProvider,
};
pub use registry::ProviderRegistry;

pub use affinity::{AffinityTarget, CacheAffinityManager};
pub use cache::{Cache, InMemoryCache};
pub use concurrency::ConcurrencyManager;
pub use cost::{compute_cost, CostBreakdown, ModelPricing};
pub use health::{CircuitState, FailureKind, HealthMonitor, SkipReason};
pub use model::{
    ApiFamily, AuthType, BillingRuleSnapshot, BillingType, CandidateState, CapabilityRule,
    Endpoint, EndpointId, EndpointKind, EndpointSignature, FormatAcceptanceConfig, GlobalModel,
    GlobalModelConfig, GlobalModelId, Model, ModelMapping, Provider, ProviderApiKey,
    ProviderApiKeyId, ProviderId, ProviderModelMapping, RequestCandidate, TokenCounts, Usage,
    UsageStatus, VideoTask, VideoTaskStatus,
};
pub use store::{ConfigStore, ProviderPriorityMode, ProviderStore, SchedulingMode, UsageStore};

// Re-export the protocol/transform typed enums from gproxy-transform.
pub use gproxy_transform::middleware::{
    CountTokensRequest, CountTokensResponse, GenerateContentRequest, GenerateContentResponse,
    MemoryTraceSummarizeRequest, MemoryTraceSummarizeResponse, ModelGetRequest, ModelGetResponse,
    ModelListRequest, ModelListResponse, Op, Proto, Request, Response, ResponseCancelRequest,
    ResponseCancelResponse, ResponseCompactRequest, ResponseCompactResponse, ResponseDeleteRequest,
    ResponseDeleteResponse, ResponseGetRequest, ResponseGetResponse, ResponseListInputItemsRequest,
    ResponseListInputItemsResponse, StreamEvent, StreamFormat, TransformContext, TransformError,
    stream_format,
};

// Re-export usage helpers used by the middleware/engine layer.
pub use gproxy_transform::middleware::{
    CountTokensFn, OutputAccumulator, UsageAccumulator, UsageError, UsageSummary,
    fallback_usage_with_count_tokens, output_for_counting, usage_from_response,
};
