//! Anthropic Messages API adapter.
//!
//! The gateway's canonical model *is* the Anthropic Messages shape, so this
//! adapter is a pass-through: it posts the request to
//! [`/v1/messages`](https://docs.anthropic.com/en/api/messages) and forwards
//! the response (or event stream) unchanged apart from auth and model
//! substitution.
//!
//! # Auth channels
//!
//! | Mode | Headers |
//! |---|---|
//! | Static key | `x-api-key: <key>` |
//! | OAuth | `Authorization: Bearer <token>` + `anthropic-beta: <beta>` |
//!
//! The OAuth bearer is obtained fresh per request by the caller (the OAuth
//! collaborator owns refresh); this adapter only places headers.

use std::time::{Duration, Instant};

use reqwest::{header, Client};
use serde_json::Value;

use super::{
    clamp_max_tokens, classify_status, classify_transport, event_stream, EventStream,
    FrameTranslator, Health,
};
use crate::{error::GatewayError, types::CanonicalRequest};

/// Default `anthropic-version` header value.
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Resolved credential channel for one request.
#[derive(Debug, Clone)]
pub struct AnthropicAuth {
    /// Static key for the `x-api-key` header.
    pub api_key: Option<String>,
    /// OAuth bearer plus the `anthropic-beta` value it requires.
    pub bearer: Option<OAuthBearer>,
    /// `anthropic-version` override from the client, if any.
    pub version: Option<String>,
}

#[derive(Debug, Clone)]
pub struct OAuthBearer {
    pub token: String,
    pub beta: String,
}

impl AnthropicAuth {
    pub fn static_key(key: impl Into<String>) -> Self {
        Self { api_key: Some(key.into()), bearer: None, version: None }
    }

    pub fn oauth(token: impl Into<String>, beta: impl Into<String>) -> Self {
        Self {
            api_key: None,
            bearer: Some(OAuthBearer { token: token.into(), beta: beta.into() }),
            version: None,
        }
    }
}

pub struct AnthropicAdapter {
    /// Unary requests — carries the total-deadline timeout.
    client: Client,
    /// Streaming requests — no request-level timeout; the idle gap between
    /// chunks is enforced by the event stream instead.
    stream_client: Client,
    base_url: String,
    timeout: Duration,
    max_tokens_limit: Option<u32>,
}

impl AnthropicAdapter {
    pub fn new(
        base_url: String,
        timeout: Duration,
        auth: AnthropicAuth,
        max_tokens_limit: Option<u32>,
    ) -> Result<Self, GatewayError> {
        let mut headers = header::HeaderMap::new();

        let version = auth.version.as_deref().unwrap_or(ANTHROPIC_VERSION);
        headers.insert(
            "anthropic-version",
            header::HeaderValue::from_str(version).map_err(|_| {
                GatewayError::BadRequest("anthropic-version contains invalid characters".into())
            })?,
        );

        if let Some(bearer) = &auth.bearer {
            headers.insert(
                header::AUTHORIZATION,
                header::HeaderValue::from_str(&format!("Bearer {}", bearer.token)).map_err(
                    |_| GatewayError::AuthFailed("OAuth token is not header-safe".into()),
                )?,
            );
            headers.insert(
                "anthropic-beta",
                header::HeaderValue::from_str(&bearer.beta).map_err(|_| {
                    GatewayError::AuthFailed("anthropic-beta value is not header-safe".into())
                })?,
            );
        } else if let Some(key) = &auth.api_key {
            headers.insert(
                "x-api-key",
                header::HeaderValue::from_str(key).map_err(|_| {
                    GatewayError::AuthFailed("API key contains invalid header characters".into())
                })?,
            );
        } else {
            return Err(GatewayError::AuthFailed(
                "Anthropic backend has neither an API key nor an OAuth token".into(),
            ));
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

    /// `POST /v1/messages`, unary.
    pub async fn chat(&self, req: &CanonicalRequest, model: &str) -> Result<Value, GatewayError> {
        let body = self.wire_body(req, model, false);
        let url = format!("{}/v1/messages", self.base_url);

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

        serde_json::from_str(&text).map_err(|e| {
            GatewayError::Upstream(format!("Anthropic response is not valid JSON: {e}"))
        })
    }

    /// `POST /v1/messages` with `stream: true`. Upstream framing is already
    /// Anthropic's event taxonomy — parsed and forwarded as-is.
    pub async fn chat_stream(
        &self,
        req: &CanonicalRequest,
        model: &str,
    ) -> Result<EventStream, GatewayError> {
        let body = self.wire_body(req, model, true);
        let url = format!("{}/v1/messages", self.base_url);

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
            FrameTranslator::Passthrough,
            self.timeout,
        ))
    }

    /// Probe with a minimal 1-token request.
    ///
    /// Anthropic exposes no models listing, so a cheap inference call is the
    /// only way to verify auth + connectivity end-to-end.
    pub async fn health(&self) -> Health {
        let probe = serde_json::json!({
            "model": "claude-3-5-haiku-20241022",
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "ping" }],
        });
        let url = format!("{}/v1/messages", self.base_url);

        let started = Instant::now();
        let result = self.client.post(&url).json(&probe).send().await;
        let latency_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(response) if response.status().is_success() => {
                Health { ok: true, latency_ms, models: None, error: None }
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

impl AnthropicAdapter {
    /// Serialize the canonical request for the wire, substituting the routed
    /// model, pinning the `stream` flag, and clamping `max_tokens`.
    fn wire_body(&self, req: &CanonicalRequest, model: &str, stream: bool) -> Value {
        let mut body = serde_json::to_value(req).unwrap_or(Value::Null);
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
