//! Backend adapter factory and unified dispatch interface.
//!
//! [`BackendClient`] is an enum wrapping a concrete provider adapter chosen
//! at construction time from [`BackendConfig::kind`]. The pipeline sees one
//! capability set — `chat`, `chat_stream`, `count_tokens`, `health` — and
//! every protocol difference (schema translation, auth headers, endpoint
//! paths, SSE framing) stays inside the adapter modules.
//!
//! Both adapters speak Anthropic downstream: `chat` returns an
//! Anthropic-shaped message body, `chat_stream` yields Anthropic's event
//! taxonomy. The OpenAI-compatible adapter translates at its edge.

mod anthropic;
mod openai;

pub use anthropic::{AnthropicAdapter, AnthropicAuth};
pub use openai::OpenAiCompatAdapter;

use std::{collections::VecDeque, pin::Pin, time::Duration};

use futures_util::{Stream, StreamExt as _};
use serde::Serialize;
use serde_json::Value;

use crate::{
    config::{BackendConfig, BackendKind},
    error::GatewayError,
    translate::StreamEvent,
    types::CanonicalRequest,
};

/// A `Send`-able, heap-allocated stream of Anthropic events.
///
/// Finite and non-restartable: ends after `message_stop` (clean) or an `Err`
/// item (upstream failure mid-stream).
pub type EventStream = Pin<Box<dyn Stream<Item = Result<StreamEvent, GatewayError>> + Send>>;

/// Result of a backend liveness probe, shaped for `/backends/status`.
#[derive(Debug, Serialize)]
pub struct Health {
    pub ok: bool,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub models: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Unified backend client — enum dispatch over concrete provider adapters.
pub enum BackendClient {
    Anthropic(AnthropicAdapter),
    OpenAiCompat(OpenAiCompatAdapter),
}

impl BackendClient {
    /// Build an adapter from config.
    ///
    /// `anthropic_auth` carries the resolved credential channel for
    /// Anthropic-kind backends (static key or a fresh OAuth bearer) plus any
    /// per-request `anthropic-version` override; it is ignored for
    /// OpenAI-compatible backends.
    pub fn new(
        cfg: &BackendConfig,
        anthropic_auth: Option<AnthropicAuth>,
    ) -> Result<Self, GatewayError> {
        let base_url = cfg.base_url.trim_end_matches('/').to_string();
        let timeout = Duration::from_secs(cfg.timeout_seconds);

        Ok(match cfg.kind {
            BackendKind::Anthropic => {
                let auth = anthropic_auth.ok_or_else(|| {
                    GatewayError::AuthFailed(
                        "no credential available for Anthropic backend".into(),
                    )
                })?;
                Self::Anthropic(AnthropicAdapter::new(
                    base_url,
                    timeout,
                    auth,
                    cfg.max_tokens_limit,
                )?)
            }
            BackendKind::OpenaiCompatible => Self::OpenAiCompat(OpenAiCompatAdapter::new(
                base_url,
                timeout,
                cfg.resolve_api_key(),
                cfg.max_tokens_limit,
            )?),
        })
    }

    /// Unary chat. Returns the Anthropic-shaped message body.
    ///
    /// `model` must already be the concrete upstream model chosen by the
    /// router; the request's own `model` field is replaced.
    pub async fn chat(&self, req: &CanonicalRequest, model: &str) -> Result<Value, GatewayError> {
        match self {
            Self::Anthropic(a) => a.chat(req, model).await,
            Self::OpenAiCompat(a) => a.chat(req, model).await,
        }
    }

    /// Streaming chat. The stream yields Anthropic events for both kinds —
    /// pass-through for Anthropic upstreams, translated for OpenAI ones.
    pub async fn chat_stream(
        &self,
        req: &CanonicalRequest,
        model: &str,
    ) -> Result<EventStream, GatewayError> {
        match self {
            Self::Anthropic(a) => a.chat_stream(req, model).await,
            Self::OpenAiCompat(a) => a.chat_stream(req, model).await,
        }
    }

    /// Probe this backend for liveness.
    pub async fn health(&self) -> Health {
        match self {
            Self::Anthropic(a) => a.health().await,
            Self::OpenAiCompat(a) => a.health().await,
        }
    }
}

/// Best-effort token count over the request text.
///
/// No upstream call: LM Studio and friends expose no counting endpoint, and
/// a heuristic keeps `/v1/messages/count_tokens` uniform across backends.
/// Uses the cl100k BPE as a reasonable cross-vendor approximation.
pub fn count_tokens(req: &CanonicalRequest) -> usize {
    let text = req.flat_text();
    match tiktoken_rs::cl100k_base() {
        Ok(bpe) => bpe.encode_with_special_tokens(&text).len(),
        // BPE init only fails on a corrupted embedded vocabulary; fall back
        // to the classic chars/4 estimate.
        Err(_) => text.len() / 4,
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Upstream outcome classification
// ──────────────────────────────────────────────────────────────────────────────

/// Classify a non-2xx upstream response into the gateway taxonomy.
pub(crate) fn classify_status(status: reqwest::StatusCode, body: &str) -> GatewayError {
    let summary = |body: &str| -> String {
        let trimmed: String = body.chars().take(300).collect();
        format!("upstream returned HTTP {status}: {trimmed}")
    };

    match status.as_u16() {
        401 | 403 => GatewayError::AuthFailed(summary(body)),
        402 => GatewayError::InsufficientCredits(summary(body)),
        429 => GatewayError::RateLimited(summary(body)),
        400..=499 => {
            // Some vendors report exhausted credits as a generic 4xx.
            let lower = body.to_lowercase();
            if lower.contains("credit balance") || lower.contains("insufficient credits") {
                GatewayError::InsufficientCredits(summary(body))
            } else {
                GatewayError::BadRequest(summary(body))
            }
        }
        _ => GatewayError::Upstream(summary(body)),
    }
}

/// Classify a transport-level failure.
pub(crate) fn classify_transport(err: reqwest::Error) -> GatewayError {
    if err.is_timeout() {
        GatewayError::Timeout(err.to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}

/// Clamp `max_tokens` to the backend's configured ceiling, logging when the
/// client asked for more.
pub(crate) fn clamp_max_tokens(requested: u32, limit: Option<u32>) -> u32 {
    match limit {
        Some(limit) if requested > limit => {
            tracing::warn!(requested, limit, "clamping max_tokens to backend limit");
            limit
        }
        _ => requested,
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// SSE wire parsing
// ──────────────────────────────────────────────────────────────────────────────

/// One parsed server-sent-event frame.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SseFrame {
    pub event: Option<String>,
    pub data: String,
}

/// Incremental SSE parser over arbitrary byte chunk boundaries.
///
/// Frames are delimited by a blank line; `event:` and `data:` fields are
/// honored, multiple `data:` lines join with `\n`, comment lines (leading
/// `:`) are dropped. CRLF-tolerant.
#[derive(Default)]
pub(crate) struct SseParser {
    buf: String,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, chunk: &[u8]) -> Vec<SseFrame> {
        self.buf.push_str(&String::from_utf8_lossy(chunk));

        let mut frames = Vec::new();
        // A frame is complete once a blank line lands in the buffer.
        // Whichever separator appears first wins.
        loop {
            let (pos, sep_len) = match (self.buf.find("\n\n"), self.buf.find("\r\n\r\n")) {
                (Some(lf), Some(crlf)) if crlf < lf => (crlf, 4),
                (Some(lf), _) => (lf, 2),
                (None, Some(crlf)) => (crlf, 4),
                (None, None) => break,
            };
            let raw = self.buf[..pos].to_string();
            self.buf.drain(..pos + sep_len);

            if let Some(frame) = Self::parse_frame(&raw) {
                frames.push(frame);
            }
        }
        frames
    }

    fn parse_frame(raw: &str) -> Option<SseFrame> {
        let mut event = None;
        let mut data_lines: Vec<&str> = Vec::new();

        for line in raw.lines() {
            let line = line.trim_end_matches('\r');
            if line.starts_with(':') {
                continue;
            }
            if let Some(value) = line.strip_prefix("event:") {
                event = Some(value.trim_start().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                data_lines.push(value.strip_prefix(' ').unwrap_or(value));
            }
        }

        if event.is_none() && data_lines.is_empty() {
            return None;
        }
        Some(SseFrame { event, data: data_lines.join("\n") })
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Byte stream → event stream adapter
// ──────────────────────────────────────────────────────────────────────────────

/// How raw SSE frames become Anthropic events.
pub(crate) enum FrameTranslator {
    /// Upstream already speaks Anthropic events; parse and forward.
    Passthrough,
    /// OpenAI `data:` chunks, coalesced by the stream translator.
    OpenAi(crate::translate::OpenAiToAnthropic),
}

impl FrameTranslator {
    fn events_for(&mut self, frame: SseFrame) -> Vec<Result<StreamEvent, GatewayError>> {
        match self {
            Self::Passthrough => {
                let data: Value = match serde_json::from_str(&frame.data) {
                    Ok(v) => v,
                    Err(_) => return Vec::new(),
                };
                let name = frame
                    .event
                    .or_else(|| data["type"].as_str().map(String::from))
                    .unwrap_or_default();
                if name.is_empty() {
                    return Vec::new();
                }
                vec![Ok(StreamEvent::new(name, data))]
            }
            Self::OpenAi(translator) => {
                if frame.data.trim() == "[DONE]" {
                    return translator.finish().into_iter().map(Ok).collect();
                }
                match serde_json::from_str::<Value>(&frame.data) {
                    Ok(chunk) => translator.push_chunk(&chunk).into_iter().map(Ok).collect(),
                    Err(_) => Vec::new(),
                }
            }
        }
    }
}

type ByteStream = Pin<Box<dyn Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send>>;

struct EventStreamState {
    body: ByteStream,
    parser: SseParser,
    translator: FrameTranslator,
    pending: VecDeque<Result<StreamEvent, GatewayError>>,
    idle_timeout: Duration,
    done: bool,
}

/// Wrap an upstream byte stream as an [`EventStream`], enforcing
/// `idle_timeout` as the maximum gap between upstream chunks.
pub(crate) fn event_stream<S>(
    body: S,
    translator: FrameTranslator,
    idle_timeout: Duration,
) -> EventStream
where
    S: Stream<Item = Result<bytes::Bytes, reqwest::Error>> + Send + 'static,
{
    let state = EventStreamState {
        body: Box::pin(body),
        parser: SseParser::new(),
        translator,
        pending: VecDeque::new(),
        idle_timeout,
        done: false,
    };

    Box::pin(futures_util::stream::unfold(state, |mut st| async move {
        loop {
            if let Some(item) = st.pending.pop_front() {
                // A mid-stream error is terminal.
                if item.is_err() {
                    st.done = true;
                    st.pending.clear();
                }
                return Some((item, st));
            }
            if st.done {
                return None;
            }

            match tokio::time::timeout(st.idle_timeout, st.body.next()).await {
                Err(_) => {
                    st.done = true;
                    return Some((
                        Err(GatewayError::Timeout(format!(
                            "no bytes from upstream for {}s",
                            st.idle_timeout.as_secs()
                        ))),
                        st,
                    ));
                }
                Ok(None) => {
                    st.done = true;
                    return None;
                }
                Ok(Some(Err(err))) => {
                    st.done = true;
                    return Some((Err(classify_transport(err)), st));
                }
                Ok(Some(Ok(chunk))) => {
                    for frame in st.parser.push(&chunk) {
                        st.pending.extend(st.translator.events_for(frame));
                    }
                }
            }
        }
    }))
}
