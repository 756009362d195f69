//! OpenAI-compatible chat completions adapter.
//!
//! Serves any backend that speaks the OpenAI `/chat/completions` protocol —
//! OpenAI itself, OpenRouter, LM Studio, vLLM, and user-declared endpoints.
//! Requests are translated from the canonical Anthropic shape on the way
//! out; responses (unary and streaming) are translated back, so downstream
//! the gateway always speaks Anthropic.

use std::time::{Duration, Instant};

use reqwest::{header, Client};
use serde_json::Value;

use super::{
    clamp_max_tokens, classify_status, classify_transport, event_stream, EventStream,
    FrameTranslator, Health,
};
use crate::{
    error::GatewayError,
    translate::{self, OpenAiToAnthropic},
    types::CanonicalRequest,
};

pub struct OpenAiCompatAdapter {
    /// Unary requests — carries the total-deadline timeout.
    client: Client,
    /// Streaming requests — no request-level timeout (the body arrives
    /// incrementally); the event stream enforces the idle gap instead.
    stream_client: Client,
    base_url: String,
    timeout: Duration,
    max_tokens_limit: Option<u32>,
}

impl OpenAiCompatAdapter {
    pub fn new(
        base_url: String,
        timeout: Duration,
        api_key: Option<String>,
        max_tokens_limit: Option<u32>,
    ) -> Result<Self, GatewayError> {
        let mut headers = header::HeaderMap::new();
        if let Some(key) = api_key {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {key}")).map_err(|_| {
                    GatewayError::AuthFailed(
                        "API key contains invalid Authorization header characters".into(),
                    )
                })?,
            );
        }

        let client = Client::builder()
            .default_headers(headers.clone())
            .timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Internal(e.into()))?;
        let stream_client = Client::builder()
            .default_headers(headers)
            .build()
            .map_err(|e| GatewayError::Internal(e.into()))?;

        Ok(Self { client, stream_client, base_url, timeout, max_tokens_limit })
    }

    /// `POST /chat/completions`, unary. Returns the Anthropic-shaped body.
    pub async fn chat(&self, req: &CanonicalRequest, model: &str) -> Result<Value, GatewayError> {
        let body = self.wire_body(req, model, false);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let text = response.text().await.map_err(classify_transport)?;

        if !status.is_success() {
            return Err(classify_status(status, &text));
        }

        let upstream: Value = serde_json::from_str(&text).map_err(|e| {
            GatewayError::Upstream(format!("backend response is not valid JSON: {e}"))
        })?;

        // The client sees its own model id, not the routed one.
        translate::response_from_openai(&upstream, &req.model)
    }

    /// `POST /chat/completions` with `stream: true`. Consumes OpenAI's
    /// `data:` framing and emits Anthropic events.
    pub async fn chat_stream(
        &self,
        req: &CanonicalRequest,
        model: &str,
    ) -> Result<EventStream, GatewayError> {
        let body = self.wire_body(req, model, true);
        let url = format!("{}/chat/completions", self.base_url);

        let response = self
            .stream_client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &text));
        }

        Ok(event_stream(
            response.bytes_stream(),
            FrameTranslator::OpenAi(OpenAiToAnthropic::new(&req.model)),
            self.timeout,
        ))
    }

    /// Probe the backend with `GET /models`.
    pub async fn health(&self) -> Health {
        let url = format!("{}/models", self.base_url);

        let started = Instant::now();
        let result = self.client.get(&url).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => {
                let models = response.json::<Value>().await.ok().and_then(|body| {
                    body["data"].as_array().map(|items| {
                        items
                            .iter()
                            .filter_map(|m| m["id"].as_str().map(String::from))
                            .collect()
                    })
                });
                Health { ok: true, latency_ms, models, error: None }
            }
            Ok(response) => Health {
                ok: false,
                latency_ms,
                models: None,
                error: Some(format!("HTTP {}", response.status())),
            },
            Err(e) => Health { ok: false, latency_ms, models: None, error: Some(e.to_string()) },
        }
    }
}

impl OpenAiCompatAdapter {
    /// Translate to the OpenAI wire, substituting the routed model, pinning
    /// the `stream` flag, and clamping `max_tokens`.
    fn wire_body(&self, req: &CanonicalRequest, model: &str, stream: bool) -> Value {
        let mut body = translate::request_to_openai(req);
        if let Some(obj) = body.as_object_mut() {
            obj.insert("model".into(), Value::String(model.to_string()));
            obj.insert("stream".into(), Value::Bool(stream));
            obj.insert(
                "max_tokens".into(),
                Value::from(clamp_max_tokens(req.max_tokens, self.max_tokens_limit)),
            );
        }
        body
    }
}
