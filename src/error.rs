//! Gateway error taxonomy and HTTP mapping.
//!
//! Adapters classify upstream outcomes into [`GatewayError`] variants; the
//! pipeline decides recovery (failover, disable, surface). At the HTTP edge
//! the error renders as the Anthropic error envelope for `/v1/messages` and
//! the OpenAI envelope for `/v1/chat/completions`.
//!
//! Every handler that can fail returns `Result<T, GatewayError>` and
//! propagates with `?` — the [`IntoResponse`] impl does the rest.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// Malformed request shape. Never retried, never routed.
    #[error("{0}")]
    BadRequest(String),

    /// Upstream rejected our credentials (401/403). Surfaced immediately.
    #[error("{0}")]
    AuthFailed(String),

    /// No routing rule produced a candidate for this model.
    #[error("no route for model `{0}`")]
    NoRoute(String),

    /// Upstream 429. Triggers failover and a model cool-down.
    #[error("{0}")]
    RateLimited(String),

    /// Upstream 402 or a documented credit-exhaustion message.
    /// Same recovery as [`Self::RateLimited`].
    #[error("{0}")]
    InsufficientCredits(String),

    /// Upstream 5xx. Failover without disabling the model.
    #[error("{0}")]
    Upstream(String),

    /// Connection, TLS, DNS, or reset. Failover without disabling.
    #[error("{0}")]
    Network(String),

    /// Total deadline (unary) or idle gap (streaming) exceeded.
    #[error("upstream timeout: {0}")]
    Timeout(String),

    /// The client went away; nothing left to answer.
    #[error("request canceled by client")]
    Canceled,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl GatewayError {
    /// The wire-visible error kind, used as `error.type` in both envelopes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "bad_request",
            Self::AuthFailed(_) => "auth_failed",
            Self::NoRoute(_) => "no_route",
            Self::RateLimited(_) => "rate_limited",
            Self::InsufficientCredits(_) => "insufficient_credits",
            Self::Upstream(_) => "upstream_error",
            Self::Network(_) => "network_error",
            Self::Timeout(_) => "timeout",
            Self::Canceled => "canceled",
            Self::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::AuthFailed(_) => StatusCode::UNAUTHORIZED,
            Self::NoRoute(_) => StatusCode::NOT_FOUND,
            Self::RateLimited(_) => StatusCode::TOO_MANY_REQUESTS,
            Self::InsufficientCredits(_) => StatusCode::PAYMENT_REQUIRED,
            Self::Upstream(_) | Self::Network(_) => StatusCode::BAD_GATEWAY,
            Self::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            // 499 "client closed request" — nginx convention, no axum constant.
            Self::Canceled => StatusCode::from_u16(499).expect("499 is a valid status code"),
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the pipeline may advance to the next routing candidate.
    pub fn allows_failover(&self) -> bool {
        matches!(
            self,
            Self::RateLimited(_)
                | Self::InsufficientCredits(_)
                | Self::Upstream(_)
                | Self::Network(_)
                | Self::Timeout(_)
        )
    }

    /// Whether this outcome should put the model on cool-down.
    pub fn disables_model(&self) -> bool {
        matches!(self, Self::RateLimited(_) | Self::InsufficientCredits(_))
    }

    /// Rank used to pick the surfaced error after failover exhaustion.
    /// Higher wins.
    pub fn severity(&self) -> u8 {
        match self {
            Self::AuthFailed(_) => 8,
            Self::BadRequest(_) => 7,
            Self::RateLimited(_) | Self::InsufficientCredits(_) => 6,
            Self::Upstream(_) => 5,
            Self::Network(_) => 4,
            Self::Timeout(_) => 3,
            Self::Canceled | Self::Internal(_) => 2,
            Self::NoRoute(_) => 1,
        }
    }

    /// Anthropic error envelope — the `/v1/messages` wire shape.
    pub fn anthropic_body(&self) -> serde_json::Value {
        json!({
            "type": "error",
            "error": { "type": self.kind(), "message": self.to_string() },
        })
    }

    /// OpenAI error envelope — the `/v1/chat/completions` wire shape.
    pub fn openai_body(&self) -> serde_json::Value {
        json!({
            "error": {
                "message": self.to_string(),
                "type": self.kind(),
                "code": self.status().as_u16(),
            },
        })
    }
}

/// Default rendering: the Anthropic envelope. The OpenAI shim wraps errors
/// itself via [`GatewayError::openai_body`].
impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        tracing::warn!(kind = self.kind(), error = %self, "request failed");
        (self.status(), Json(self.anthropic_body())).into_response()
    }
}
