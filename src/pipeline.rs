//! The request pipeline — the orchestrator behind every chat endpoint.
//!
//! For each request: validate → apply model overrides → fingerprint →
//! consult the cache → route → try candidates in order. Failover to the next
//! candidate is legal only while no bytes have been sent to the client;
//! streaming commits as soon as the upstream confirms 2xx and hands us its
//! event stream. Rate-limit and credit failures put the model on cool-down;
//! auth and shape failures surface immediately; the rest fail over without
//! disabling anything.
//!
//! Successful unary bodies are admitted to the cache directly. Streams are
//! buffered alongside forwarding (capped at 1 MiB) and admitted only on a
//! clean `message_stop` — a client that disconnects mid-stream tears the
//! whole chain down and nothing is cached.

use std::{
    sync::{Arc, RwLock},
    time::{Duration, Instant},
};

use bytes::Bytes;
use futures_util::StreamExt as _;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::{
    availability::AvailabilityRegistry,
    backends::{AnthropicAuth, BackendClient, EventStream},
    cache::ResponseCache,
    classifier::{Classifier, KeywordClassifier},
    config::{BackendConfig, BackendKind, Config},
    error::GatewayError,
    fingerprint::fingerprint,
    oauth::{OAuthManager, OAUTH_BETA},
    router::{self, RouteInputs},
    translate::{self, StreamEvent},
    types::CanonicalRequest,
};

/// Cap on the per-response buffer used for cache admission of streams.
/// A response that outgrows it still streams through; it just isn't cached.
const STREAM_ADMISSION_CAP: usize = 1024 * 1024;

/// Shared application state injected into every request handler.
pub struct GatewayState {
    /// Swappable config snapshot; the lock is held only for `Arc::clone`.
    config_lock: RwLock<Arc<Config>>,
    pub cache: ResponseCache,
    pub availability: AvailabilityRegistry,
    pub oauth: OAuthManager,
    pub classifier: Option<Box<dyn Classifier>>,
    pub started_at: Instant,
}

impl GatewayState {
    pub fn new(config: Arc<Config>) -> Self {
        let cache = ResponseCache::new(
            config.cache.max_entries,
            Duration::from_secs(config.cache.ttl_seconds),
        );
        let oauth_client_id = config
            .providers_auth
            .get("anthropic")
            .and_then(|a| a.oauth.as_ref())
            .map(|o| o.client_id.clone());

        Self {
            config_lock: RwLock::new(config),
            cache,
            availability: AvailabilityRegistry::new(),
            oauth: OAuthManager::new(oauth_client_id),
            classifier: Some(Box::new(KeywordClassifier::new())),
            started_at: Instant::now(),
        }
    }

    /// Stable reference to the current config snapshot.
    pub fn config(&self) -> Arc<Config> {
        self.config_lock.read().expect("config lock poisoned").clone()
    }
}

/// Per-request header overrides honored by the pipeline.
#[derive(Debug, Default, Clone)]
pub struct RequestOverrides {
    /// `x-backend` — pins the backend for this request.
    pub backend: Option<String>,
    /// `x-api-key` — client-supplied upstream credential.
    pub api_key: Option<String>,
    /// `anthropic-version` — forwarded to Anthropic backends.
    pub anthropic_version: Option<String>,
}

/// What a pipeline run hands back to the HTTP layer.
pub enum PipelineResponse {
    /// Anthropic-shaped message body.
    Unary(Value),
    /// Anthropic event stream, ready for SSE framing.
    Stream(EventStream),
}

impl std::fmt::Debug for PipelineResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unary(v) => f.debug_tuple("Unary").field(v).finish(),
            Self::Stream(_) => f.debug_tuple("Stream").field(&"..").finish(),
        }
    }
}

/// Run one request through the pipeline.
pub async fn handle(
    state: &Arc<GatewayState>,
    mut req: CanonicalRequest,
    overrides: RequestOverrides,
) -> Result<PipelineResponse, GatewayError> {
    req.validate().map_err(GatewayError::BadRequest)?;

    let config = state.config();
    let now = Instant::now();

    // Overrides rewrite the client-facing model before anything else sees it.
    req.model = config.apply_model_override(&req.model).to_string();

    if let Some(backend) = &overrides.backend {
        if !config.backends.contains_key(backend) {
            return Err(GatewayError::BadRequest(format!(
                "x-backend names unknown backend `{backend}`"
            )));
        }
    }

    let fp = fingerprint(&req);
    if config.cache.enabled {
        if let Some(entry) = state.cache.get(&fp, now) {
            debug!(fingerprint = %fp, "cache hit");
            return cached_response(&entry.body, req.stream);
        }
    }

    let decision = router::route(
        &req,
        &RouteInputs {
            config: &config,
            availability: &state.availability,
            classifier: state.classifier.as_deref(),
            header_backend: overrides.backend.as_deref(),
            now,
        },
    )?;

    let disable_duration = Duration::from_secs(config.model_availability.disable_duration_seconds);
    let mut failures: Vec<GatewayError> = Vec::new();

    for candidate in &decision {
        let Some(backend_cfg) = config.backends.get(&candidate.backend) else {
            // Validation makes this unreachable for config-sourced routes;
            // guard anyway for header pins racing a config swap.
            failures.push(GatewayError::NoRoute(candidate.model.clone()));
            continue;
        };

        let client = match BackendClient::new(
            backend_cfg,
            anthropic_auth(state, backend_cfg, &overrides).await,
        ) {
            Ok(client) => client,
            Err(e) => {
                warn!(backend = %candidate.backend, error = %e, "adapter construction failed");
                failures.push(e);
                continue;
            }
        };

        debug!(
            backend = %candidate.backend,
            model = %candidate.model,
            stream = req.stream,
            "calling upstream"
        );

        let err = if req.stream {
            match client.chat_stream(&req, &candidate.model).await {
                Ok(stream) => {
                    // Committed: bytes will flow to the client, so this
                    // candidate's outcome is final whatever happens mid-stream.
                    info!(backend = %candidate.backend, model = %candidate.model, "streaming");
                    return Ok(PipelineResponse::Stream(record_stream(
                        stream,
                        Arc::clone(state),
                        fp,
                        config.cache.enabled,
                    )));
                }
                Err(e) => e,
            }
        } else {
            match client.chat(&req, &candidate.model).await {
                Ok(body) => {
                    if config.cache.enabled {
                        admit_unary(state, &fp, &body);
                    }
                    info!(backend = %candidate.backend, model = %candidate.model, "completed");
                    return Ok(PipelineResponse::Unary(body));
                }
                Err(e) => e,
            }
        };

        if err.disables_model() {
            warn!(
                model = %candidate.model,
                cooldown_secs = disable_duration.as_secs(),
                kind = err.kind(),
                "disabling model"
            );
            state.availability.disable(&candidate.model, Instant::now(), disable_duration);
        }

        if !err.allows_failover() {
            return Err(err);
        }

        warn!(
            backend = %candidate.backend,
            model = %candidate.model,
            kind = err.kind(),
            "candidate failed, trying next"
        );
        failures.push(err);
    }

    // Exhausted: surface the most severe recorded failure.
    Err(failures
        .into_iter()
        .max_by_key(GatewayError::severity)
        .unwrap_or_else(|| GatewayError::NoRoute(req.model.clone())))
}

/// Resolve the Anthropic credential channel for a backend, preferring the
/// per-request key, then an OAuth session, then the configured static key.
pub async fn anthropic_auth(
    state: &GatewayState,
    backend_cfg: &BackendConfig,
    overrides: &RequestOverrides,
) -> Option<AnthropicAuth> {
    if backend_cfg.kind != BackendKind::Anthropic {
        return None;
    }

    let mut auth = if let Some(key) = &overrides.api_key {
        AnthropicAuth::static_key(key.clone())
    } else if let Some(token) = state.oauth.bearer().await {
        AnthropicAuth::oauth(token, OAUTH_BETA)
    } else {
        AnthropicAuth::static_key(backend_cfg.resolve_api_key()?)
    };
    auth.version = overrides.anthropic_version.clone();
    Some(auth)
}

/// Serve a cache hit in whichever shape the client asked for.
fn cached_response(body: &Bytes, stream: bool) -> Result<PipelineResponse, GatewayError> {
    let parsed: Value = serde_json::from_slice(body)
        .map_err(|e| GatewayError::Internal(anyhow::anyhow!("corrupt cache entry: {e}")))?;

    if stream {
        let events = translate::replay_as_events(&parsed);
        Ok(PipelineResponse::Stream(Box::pin(futures_util::stream::iter(
            events.into_iter().map(Ok),
        ))))
    } else {
        Ok(PipelineResponse::Unary(parsed))
    }
}

fn admit_unary(state: &Arc<GatewayState>, fp: &str, body: &Value) {
    let bytes = Bytes::from(body.to_string());
    state.cache.put(fp.to_string(), bytes, "application/json", Instant::now());
}

/// Buffer events alongside forwarding; admit the reconstructed unary body on
/// a clean `message_stop`. Oversized or error-bearing streams are forwarded
/// but never cached.
fn record_stream(
    stream: EventStream,
    state: Arc<GatewayState>,
    fp: String,
    cache_enabled: bool,
) -> EventStream {
    struct Recorder {
        events: Vec<StreamEvent>,
        buffered: usize,
        capped: bool,
        poisoned: bool,
    }

    let mut recorder =
        Recorder { events: Vec::new(), buffered: 0, capped: false, poisoned: !cache_enabled };

    Box::pin(stream.map(move |item| {
        match &item {
            Ok(event) => {
                if !recorder.poisoned && !recorder.capped {
                    recorder.buffered += event.wire_len();
                    if recorder.buffered > STREAM_ADMISSION_CAP {
                        debug!("stream exceeds admission buffer cap; will not cache");
                        recorder.capped = true;
                        recorder.events.clear();
                    } else {
                        recorder.events.push(event.clone());
                    }
                }
                if event.event == "message_stop" && !recorder.poisoned && !recorder.capped {
                    if let Some(body) = translate::assemble_from_events(&recorder.events) {
                        admit_unary(&state, &fp, &body);
                        debug!(fingerprint = %fp, "stream admitted to cache");
                    }
                    recorder.poisoned = true; // one admission per stream
                }
            }
            Err(_) => {
                recorder.poisoned = true;
                recorder.events.clear();
            }
        }
        item
    }))
}
