//! Candidate selection, scheduling, failover, and streaming policy
//! (spec.md §4.6-§4.10).
//!
//! This is the routing brain: given a parsed request it enumerates viable
//! `(Provider, Endpoint, ProviderApiKey)` candidates, orders them, and walks
//! the ordered list attempting each one until success or exhaustion. For a
//! streaming attempt, `stream::StreamPipeline` layers the prefetch/TTFB/
//! disconnect/timeout/smoothing policies spec.md §4.10 names on top of
//! whatever SSE events the attempt produces. It operates purely over the
//! `gproxy-provider-core` model/store abstractions and caller-supplied
//! closures/traits, so it has no opinion on how an attempt is actually
//! transported — see `DESIGN.md` for how this relates to `proxy_engine`,
//! which still owns the wire-level HTTP/decoding machinery.

pub mod candidate;
pub mod dispatcher;
pub mod failover;
pub mod rectify;
pub mod scheduler;
pub mod stream;

pub use candidate::{Candidate, CandidateBuilder, CandidateError, CandidateRequest, Compatibility};
pub use dispatcher::{AttemptExecutor, AttemptOutcome, DispatchError, DispatchRequest, Dispatcher};
pub use failover::{Action, EngineError, EngineErrorKind, ExecutionError, ExecutionResult, FailoverEngine, RetryPolicy, SkipPolicy};
pub use rectify::{rectify_stage1, rectify_stage2, RectifyError};
pub use scheduler::Scheduler;
pub use stream::{
    attribute_cancellation, ByteStream, ChunkParser, DisconnectCheck, EmbeddedError, EventConverter,
    ParsedChunk, PipelineOutcome, PipelineStatus, PrefetchOutcome, SmoothingConfig, StreamPipeline,
    StreamPipelineConfig, TextReencoder,
};
