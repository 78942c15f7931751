//! `StreamPipeline` (spec.md §4.10): the policy layer sitting over a live
//! upstream SSE byte stream. It owns prefetch-before-replay, TTFB marking,
//! disconnect detection, cancellation attribution, the empty-stream/data
//! timeout, connection-close flushing, and optional smoothing.
//!
//! Wire-format decoding and cross-format translation are a different
//! concern and live in `gproxy-protocol`/`gproxy-transform`
//! (`proxy_engine::wire::StreamDecoder`, `gproxy-transform::middleware::stream`)
//! — this module is deliberately blind to any particular wire format. It
//! consumes already-framed `SseEvent`s and a caller-supplied `ChunkParser`
//! for usage/error extraction (spec.md §4.2), and a caller-supplied
//! `EventConverter` when cross-format translation is needed, the same
//! separation `gproxy-core::engine::{candidate,scheduler,failover}` already
//! draw between policy and transport.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::time::Instant;

use gproxy_protocol::sse::{SseEvent, SseParser};
use gproxy_provider_core::model::TokenCounts;
use gproxy_provider_core::store::ConfigStore;

pub type ByteStream = mpsc::Receiver<Bytes>;

#[derive(Debug, Clone)]
pub struct StreamPipelineConfig {
    pub max_prefetch_lines: usize,
    pub max_prefetch_bytes: usize,
    pub data_timeout: Duration,
    pub empty_chunk_threshold: u32,
    pub disconnect_poll_interval: Duration,
    pub smoothing: Option<SmoothingConfig>,
}

impl Default for StreamPipelineConfig {
    fn default() -> Self {
        Self {
            max_prefetch_lines: 20,
            max_prefetch_bytes: 8 * 1024,
            data_timeout: Duration::from_secs(30),
            empty_chunk_threshold: 50,
            disconnect_poll_interval: Duration::from_millis(500),
            smoothing: None,
        }
    }
}

impl StreamPipelineConfig {
    /// Reads the spec.md §6 knobs this struct actually owns
    /// (`stream_prefetch_lines`, `max_prefetch_bytes`,
    /// `stream_smoothing_*`); `stream_first_byte_timeout` is a transport-layer
    /// concern (it bounds waiting for the first byte, before a
    /// `StreamPipeline` even exists) and `empty_chunk_threshold`/
    /// `disconnect_poll_interval` have no corresponding config knob, so both
    /// stay at their `Default` values here.
    pub async fn from_config_store(config: &dyn ConfigStore) -> Self {
        let smoothing = if config.stream_smoothing_enabled().await {
            Some(SmoothingConfig {
                chunk_size: config.stream_smoothing_chunk_size().await,
                delay: Duration::from_millis(config.stream_smoothing_delay_ms().await),
            })
        } else {
            None
        };
        Self {
            max_prefetch_lines: config.stream_prefetch_lines().await,
            max_prefetch_bytes: config.max_prefetch_bytes().await,
            smoothing,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SmoothingConfig {
    pub chunk_size: usize,
    pub delay: Duration,
}

/// What a format-specific parser extracts from one SSE data payload
/// (spec.md §4.2). `usage_delta` is folded into the pipeline's running
/// total with `TokenCounts::merge_max`, never summed — different providers
/// place authoritative totals in different events.
#[derive(Debug, Clone, Default)]
pub struct ParsedChunk {
    pub text_delta: Option<String>,
    pub usage_delta: Option<TokenCounts>,
    pub done: bool,
    pub error: Option<EmbeddedError>,
}

#[derive(Debug, Clone)]
pub struct EmbeddedError {
    pub status: Option<u16>,
    pub message: String,
}

/// Per-format usage/text/done/error extraction from one SSE event.
pub trait ChunkParser: Send + Sync {
    fn parse(&self, event: &SseEvent) -> ParsedChunk;
}

/// Polled roughly every `disconnect_poll_interval` while the pipeline is
/// otherwise idle waiting on upstream data (spec.md §4.10 stage 4), and
/// again on demand by `attribute_cancellation` (stage 5).
#[async_trait]
pub trait DisconnectCheck: Send + Sync {
    async fn is_disconnected(&self) -> bool;
}

/// Converts one source-format SSE event into zero or more target-format
/// wire chunks, threading `StreamState` (spec.md §4.1) internally across
/// calls. Absent (`None` in `StreamPipeline::run`) means "forward the raw
/// bytes verbatim while still parsing them for usage".
pub trait EventConverter: Send {
    fn convert(&mut self, event: &SseEvent, raw: &Bytes) -> Vec<Bytes>;
}

/// Re-encodes one smoothed text sub-delta into a wire SSE chunk. `is_first`
/// tells the reencoder whether to carry a `role` field, per spec.md §4.10
/// stage 9 ("preserve role only in the first sub-chunk").
pub trait TextReencoder: Send {
    fn reencode(&mut self, text: &str, is_first: bool) -> Bytes;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    /// A `done` marker was observed (or the upstream closed cleanly after
    /// one), candidate succeeded.
    Completed,
    /// `DisconnectCheck` confirmed the client was gone; bill partial
    /// output, candidate state is `cancelled`, HTTP-visible status 499.
    ClientDisconnected,
    /// The surrounding task was cancelled but the client is still there;
    /// HTTP-visible status 503.
    ServerCancelled,
    /// `EMPTY_CHUNK_THRESHOLD` non-data lines with no data chunks and
    /// `data_timeout` elapsed since the last one.
    EmptyStreamTimeout,
    /// Upstream closed the connection before a `done` marker arrived.
    ConnectionError,
}

#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub status: PipelineStatus,
    pub usage: TokenCounts,
    pub text: String,
    pub first_byte_time_ms: Option<u64>,
    pub had_data: bool,
    pub embedded_error: Option<EmbeddedError>,
}

pub enum PrefetchOutcome {
    /// No error detected in the prefetched window; `replay` is the exact
    /// bytes read so far and must be forwarded to the client (or the
    /// converter) before the main loop resumes reading `source`.
    Ready { replay: Vec<Bytes> },
    EmbeddedError(EmbeddedError),
    /// First bytes looked like an HTML error page — a misconfigured base
    /// URL, not a real SSE stream.
    LooksLikeHtml,
    /// Upstream closed before producing anything.
    Empty,
}

/// Drives one streaming upstream attempt end to end. One instance per
/// candidate attempt; `StreamState`-equivalent running fields are reset by
/// constructing a fresh `StreamPipeline` on retry, per spec.md §9's design
/// note that this state must never survive a retry.
pub struct StreamPipeline {
    cfg: StreamPipelineConfig,
    sse: SseParser,
    usage: TokenCounts,
    text: String,
    first_byte_time_ms: Option<u64>,
    had_data: bool,
    completed: bool,
    started: Instant,
    empty_chunks_since_data: u32,
}

impl StreamPipeline {
    pub fn new(cfg: StreamPipelineConfig) -> Self {
        Self {
            cfg,
            sse: SseParser::new(),
            usage: TokenCounts::default(),
            text: String::new(),
            first_byte_time_ms: None,
            had_data: false,
            completed: false,
            started: Instant::now(),
            empty_chunks_since_data: 0,
        }
    }

    /// Stage 1 (spec.md §4.10): read up to `max_prefetch_lines` /
    /// `max_prefetch_bytes` while holding the stream open, raising on the
    /// first embedded error or HTML-looking body rather than ever emitting
    /// a byte to the client.
    pub async fn prefetch(&mut self, source: &mut ByteStream, parser: &dyn ChunkParser) -> PrefetchOutcome {
        let mut replay = Vec::new();
        let mut total_bytes = 0usize;
        let mut lines = 0usize;
        let mut first_chunk = true;

        while lines < self.cfg.max_prefetch_lines && total_bytes < self.cfg.max_prefetch_bytes {
            match source.recv().await {
                None => {
                    if replay.is_empty() {
                        return PrefetchOutcome::Empty;
                    }
                    break;
                }
                Some(chunk) => {
                    if first_chunk {
                        first_chunk = false;
                        if looks_like_html(&chunk) {
                            return PrefetchOutcome::LooksLikeHtml;
                        }
                    }
                    total_bytes += chunk.len();
                    replay.push(chunk.clone());
                    let events = self.sse.push_bytes(&chunk);
                    for ev in &events {
                        lines += 1;
                        let parsed = parser.parse(ev);
                        if let Some(err) = parsed.error {
                            return PrefetchOutcome::EmbeddedError(err);
                        }
                        self.fold(&parsed);
                    }
                }
            }
        }
        PrefetchOutcome::Ready { replay }
    }

    /// Stages 2-8: the main yield loop. `converter` is `Some` when
    /// `needs_conversion`; `reencoder` only matters when smoothing is
    /// configured and the parsed chunk carries a text delta. Emits through
    /// `sink`; returns once the stream reaches a terminal outcome.
    pub async fn run(
        &mut self,
        source: &mut ByteStream,
        sink: &mpsc::Sender<Bytes>,
        parser: &dyn ChunkParser,
        mut converter: Option<&mut dyn EventConverter>,
        mut reencoder: Option<&mut dyn TextReencoder>,
        disconnect: &dyn DisconnectCheck,
        mut on_first_byte: impl FnMut(u64) + Send,
    ) -> PipelineOutcome {
        let mut poll = tokio::time::interval(self.cfg.disconnect_poll_interval);
        poll.tick().await; // first tick fires immediately; consume it so the real cadence starts next

        loop {
            tokio::select! {
                biased;

                _ = poll.tick() => {
                    if disconnect.is_disconnected().await {
                        return self.finish(PipelineStatus::ClientDisconnected);
                    }
                }

                read = tokio::time::timeout(self.cfg.data_timeout, source.recv()) => {
                    match read {
                        Err(_elapsed) => return self.finish(PipelineStatus::EmptyStreamTimeout),
                        Ok(None) => {
                            let tail = self.sse.finish();
                            self.emit_events(&tail, parser, sink, &mut converter, &mut reencoder, &mut on_first_byte).await;
                            let status = if self.completed {
                                PipelineStatus::Completed
                            } else {
                                PipelineStatus::ConnectionError
                            };
                            return self.finish(status);
                        }
                        Ok(Some(bytes)) => {
                            let events = self.sse.push_bytes(&bytes);
                            if events.is_empty() {
                                self.empty_chunks_since_data += 1;
                            } else {
                                self.empty_chunks_since_data = 0;
                            }
                            self.emit_events(&events, parser, sink, &mut converter, &mut reencoder, &mut on_first_byte).await;
                            if self.completed {
                                return self.finish(PipelineStatus::Completed);
                            }
                            if !self.had_data && self.empty_chunks_since_data >= self.cfg.empty_chunk_threshold {
                                return self.finish(PipelineStatus::EmptyStreamTimeout);
                            }
                        }
                    }
                }
            }
        }
    }

    async fn emit_events(
        &mut self,
        events: &[SseEvent],
        parser: &dyn ChunkParser,
        sink: &mpsc::Sender<Bytes>,
        converter: &mut Option<&mut dyn EventConverter>,
        reencoder: &mut Option<&mut dyn TextReencoder>,
        on_first_byte: &mut impl FnMut(u64),
    ) {
        for ev in events {
            let parsed = parser.parse(ev);
            self.fold(&parsed);

            let raw = encode_event_verbatim(ev);
            let wire_chunks: Vec<Bytes> = match converter {
                Some(c) => c.convert(ev, &raw),
                None => vec![raw],
            };

            if wire_chunks.is_empty() {
                continue;
            }

            self.mark_first_byte(on_first_byte);

            match (&self.cfg.smoothing, &parsed.text_delta, reencoder.as_mut()) {
                (Some(sm), Some(text), Some(r)) if !text.is_empty() => {
                    self.emit_smoothed(text, *sm, &mut *r, sink).await;
                }
                _ => {
                    for chunk in wire_chunks {
                        if sink.send(chunk).await.is_err() {
                            // client gone; the outer disconnect poll will catch it on
                            // the next tick, nothing more to do here.
                            return;
                        }
                    }
                }
            }

            if parsed.done {
                self.completed = true;
                return;
            }
        }
    }

    async fn emit_smoothed(&mut self, text: &str, cfg: SmoothingConfig, reencoder: &mut dyn TextReencoder, sink: &mpsc::Sender<Bytes>) {
        let pieces = split_fixed(text, cfg.chunk_size.max(1));
        for (i, piece) in pieces.iter().enumerate() {
            let chunk = reencoder.reencode(piece, i == 0);
            if sink.send(chunk).await.is_err() {
                return;
            }
            if i + 1 < pieces.len() {
                tokio::time::sleep(cfg.delay).await;
            }
        }
    }

    fn fold(&mut self, parsed: &ParsedChunk) {
        if let Some(delta) = &parsed.text_delta {
            self.text.push_str(delta);
            self.had_data = true;
        }
        if let Some(usage) = &parsed.usage_delta {
            self.usage.merge_max(usage);
        }
    }

    fn mark_first_byte(&mut self, on_first_byte: &mut impl FnMut(u64)) {
        if self.first_byte_time_ms.is_none() {
            let elapsed = self.started.elapsed().as_millis() as u64;
            self.first_byte_time_ms = Some(elapsed);
            on_first_byte(elapsed);
        }
    }

    fn finish(&self, status: PipelineStatus) -> PipelineOutcome {
        PipelineOutcome {
            status,
            usage: self.usage.clone(),
            text: self.text.clone(),
            first_byte_time_ms: self.first_byte_time_ms,
            had_data: self.had_data,
            embedded_error: None,
        }
    }

    /// Heuristic token estimation (spec.md §4.10 last paragraph) for an
    /// incomplete stream whose totals are still zero: ~4 chars/token over
    /// the collected text and the outgoing request body, rather than
    /// billing zero.
    pub fn estimate_tokens_if_zero(outcome: &mut PipelineOutcome, request_body_chars: usize) {
        if outcome.usage.output_tokens == 0 && !outcome.text.is_empty() {
            outcome.usage.output_tokens = (outcome.text.chars().count() / 4).max(1) as u64;
        }
        if outcome.usage.input_tokens == 0 && request_body_chars > 0 {
            outcome.usage.input_tokens = (request_body_chars / 4).max(1) as u64;
        }
    }
}

/// Stage 5: cancellation attribution. Called by the caller's own
/// cancellation handling (e.g. a `tokio::select!` arm racing the pipeline
/// future against the surrounding HTTP task being dropped) — never by
/// `StreamPipeline` itself, since a dropped future can't run further
/// `.await` points. Only attributes to the client (499) when a disconnect
/// is positively confirmed; anything else is server-side (503).
pub async fn attribute_cancellation(disconnect: &dyn DisconnectCheck) -> PipelineStatus {
    if disconnect.is_disconnected().await {
        PipelineStatus::ClientDisconnected
    } else {
        PipelineStatus::ServerCancelled
    }
}

fn looks_like_html(chunk: &Bytes) -> bool {
    let sample: Vec<u8> = chunk.iter().take(64).copied().collect();
    let text = String::from_utf8_lossy(&sample);
    text.trim_start().starts_with('<')
}

fn encode_event_verbatim(ev: &SseEvent) -> Bytes {
    let mut out = String::new();
    if let Some(name) = &ev.event {
        out.push_str("event: ");
        out.push_str(name);
        out.push('\n');
    }
    for line in ev.data.split('\n') {
        out.push_str("data: ");
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
    Bytes::from(out)
}

fn split_fixed(text: &str, chunk_size: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return vec![String::new()];
    }
    chars
        .chunks(chunk_size)
        .map(|c| c.iter().collect::<String>())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UpperParser;
    impl ChunkParser for UpperParser {
        fn parse(&self, event: &SseEvent) -> ParsedChunk {
            if event.data == "[DONE]" {
                return ParsedChunk { done: true, ..Default::default() };
            }
            if let Ok(v) = serde_json::from_str::<serde_json::Value>(&event.data) {
                if let Some(err) = v.get("error") {
                    return ParsedChunk {
                        error: Some(EmbeddedError {
                            status: err.get("code").and_then(|c| c.as_u64()).map(|c| c as u16),
                            message: err.get("message").and_then(|m| m.as_str()).unwrap_or("").to_string(),
                        }),
                        ..Default::default()
                    };
                }
                let delta = v.get("delta").and_then(|d| d.as_str()).map(|s| s.to_string());
                let usage = v.get("usage").and_then(|u| {
                    Some(TokenCounts {
                        input_tokens: u.get("input").and_then(|x| x.as_u64())?,
                        output_tokens: u.get("output").and_then(|x| x.as_u64())?,
                        ..Default::default()
                    })
                });
                return ParsedChunk { text_delta: delta, usage_delta: usage, done: false, error: None };
            }
            ParsedChunk::default()
        }
    }

    struct NeverDisconnected;
    #[async_trait]
    impl DisconnectCheck for NeverDisconnected {
        async fn is_disconnected(&self) -> bool {
            false
        }
    }

    struct AlwaysDisconnected;
    #[async_trait]
    impl DisconnectCheck for AlwaysDisconnected {
        async fn is_disconnected(&self) -> bool {
            true
        }
    }

    fn event(data: &str) -> Bytes {
        Bytes::from(format!("data: {data}\n\n"))
    }

    #[tokio::test]
    async fn prefetch_detects_embedded_error_without_forwarding() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(event(r#"{"error":{"code":429,"message":"quota"}}"#)).await.unwrap();
        drop(tx);

        let mut pipeline = StreamPipeline::new(StreamPipelineConfig::default());
        let outcome = pipeline.prefetch(&mut rx, &UpperParser).await;
        match outcome {
            PrefetchOutcome::EmbeddedError(err) => {
                assert_eq!(err.status, Some(429));
                assert_eq!(err.message, "quota");
            }
            _ => panic!("expected embedded error"),
        }
    }

    #[tokio::test]
    async fn prefetch_flags_html_body() {
        let (tx, mut rx) = mpsc::channel(8);
        tx.send(Bytes::from_static(b"<html><body>502 Bad Gateway</body></html>")).await.unwrap();
        drop(tx);

        let mut pipeline = StreamPipeline::new(StreamPipelineConfig::default());
        assert!(matches!(pipeline.prefetch(&mut rx, &UpperParser).await, PrefetchOutcome::LooksLikeHtml));
    }

    #[tokio::test]
    async fn run_accumulates_usage_with_monotone_max_and_completes_on_done() {
        let (tx, mut rx) = mpsc::channel(8);
        let (out_tx, mut out_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            tx.send(event(r#"{"delta":"hel","usage":{"input":5,"output":1}}"#)).await.unwrap();
            tx.send(event(r#"{"delta":"lo","usage":{"input":5,"output":2}}"#)).await.unwrap();
            tx.send(event("[DONE]")).await.unwrap();
        });

        let mut pipeline = StreamPipeline::new(StreamPipelineConfig::default());
        let outcome = pipeline
            .run(&mut rx, &out_tx, &UpperParser, None, None, &NeverDisconnected, |_ms| {})
            .await;

        assert_eq!(outcome.status, PipelineStatus::Completed);
        assert_eq!(outcome.text, "hello");
        assert_eq!(outcome.usage.input_tokens, 5);
        assert_eq!(outcome.usage.output_tokens, 2);
        assert!(outcome.first_byte_time_ms.is_some());
        drop(out_rx);
    }

    #[tokio::test]
    async fn disconnect_is_detected_even_with_no_upstream_traffic() {
        let (_tx, mut rx) = mpsc::channel::<Bytes>(1);
        let (out_tx, _out_rx) = mpsc::channel(8);

        let mut cfg = StreamPipelineConfig::default();
        cfg.disconnect_poll_interval = Duration::from_millis(5);
        cfg.data_timeout = Duration::from_secs(5);
        let mut pipeline = StreamPipeline::new(cfg);

        let outcome = pipeline
            .run(&mut rx, &out_tx, &UpperParser, None, None, &AlwaysDisconnected, |_ms| {})
            .await;
        assert_eq!(outcome.status, PipelineStatus::ClientDisconnected);
    }

    #[tokio::test]
    async fn connection_close_before_done_is_reported_as_connection_error() {
        let (tx, mut rx) = mpsc::channel(8);
        let (out_tx, _out_rx) = mpsc::channel(8);
        tokio::spawn(async move {
            tx.send(event(r#"{"delta":"partial","usage":{"input":1,"output":1}}"#)).await.unwrap();
            // channel drops here without a [DONE] marker
        });

        let mut pipeline = StreamPipeline::new(StreamPipelineConfig::default());
        let outcome = pipeline
            .run(&mut rx, &out_tx, &UpperParser, None, None, &NeverDisconnected, |_ms| {})
            .await;
        assert_eq!(outcome.status, PipelineStatus::ConnectionError);
        assert!(outcome.had_data);
        assert_eq!(outcome.text, "partial");
    }

    #[tokio::test]
    async fn empty_stream_times_out_when_no_data_arrives() {
        let (_tx, mut rx) = mpsc::channel::<Bytes>(1);
        let (out_tx, _out_rx) = mpsc::channel(8);
        let mut cfg = StreamPipelineConfig::default();
        cfg.data_timeout = Duration::from_millis(10);
        cfg.disconnect_poll_interval = Duration::from_secs(5);
        let mut pipeline = StreamPipeline::new(cfg);

        let outcome = pipeline
            .run(&mut rx, &out_tx, &UpperParser, None, None, &NeverDisconnected, |_ms| {})
            .await;
        assert_eq!(outcome.status, PipelineStatus::EmptyStreamTimeout);
    }

    #[test]
    fn split_fixed_preserves_all_characters() {
        let pieces = split_fixed("hello world", 4);
        assert_eq!(pieces.join(""), "hello world");
        assert_eq!(pieces, vec!["hell", "o wo", "rld"]);
    }

    #[test]
    fn estimate_tokens_only_fills_in_zero_totals() {
        let mut outcome = PipelineOutcome {
            status: PipelineStatus::ConnectionError,
            usage: TokenCounts::default(),
            text: "a".repeat(40),
            first_byte_time_ms: Some(10),
            had_data: true,
            embedded_error: None,
        };
        StreamPipeline::estimate_tokens_if_zero(&mut outcome, 80);
        assert_eq!(outcome.usage.output_tokens, 10);
        assert_eq!(outcome.usage.input_tokens, 20);
    }

    struct FixtureConfig {
        smoothing_enabled: bool,
    }

    #[async_trait]
    impl ConfigStore for FixtureConfig {
        async fn provider_priority_mode(&self) -> gproxy_provider_core::store::ProviderPriorityMode {
            gproxy_provider_core::store::ProviderPriorityMode::Provider
        }
        async fn scheduling_mode(&self) -> gproxy_provider_core::store::SchedulingMode {
            gproxy_provider_core::store::SchedulingMode::CacheAffinity
        }
        async fn format_conversion_enabled(&self) -> bool {
            true
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
            5
        }
        async fn video_max_poll_count(&self) -> u32 {
            60
        }
        async fn stream_first_byte_timeout_ms(&self) -> u64 {
            10_000
        }
        async fn stream_prefetch_lines(&self) -> usize {
            7
        }
        async fn max_prefetch_bytes(&self) -> usize {
            4096
        }
        async fn stream_smoothing_enabled(&self) -> bool {
            self.smoothing_enabled
        }
        async fn stream_smoothing_chunk_size(&self) -> usize {
            3
        }
        async fn stream_smoothing_delay_ms(&self) -> u64 {
            20
        }
    }

    #[tokio::test]
    async fn config_store_knobs_feed_prefetch_and_smoothing() {
        let cfg = StreamPipelineConfig::from_config_store(&FixtureConfig { smoothing_enabled: true }).await;
        assert_eq!(cfg.max_prefetch_lines, 7);
        assert_eq!(cfg.max_prefetch_bytes, 4096);
        let smoothing = cfg.smoothing.expect("smoothing enabled");
        assert_eq!(smoothing.chunk_size, 3);
        assert_eq!(smoothing.delay, Duration::from_millis(20));
    }

    #[tokio::test]
    async fn config_store_smoothing_disabled_is_none() {
        let cfg = StreamPipelineConfig::from_config_store(&FixtureConfig { smoothing_enabled: false }).await;
        assert!(cfg.smoothing.is_none());
    }
}
