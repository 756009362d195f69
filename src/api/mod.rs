//! HTTP surface — thin handlers over the pipeline and the admin state.
//!
//! All routing, caching, and failover logic lives in [`crate::pipeline`];
//! handlers only translate HTTP concerns (headers, status codes, SSE
//! framing) into pipeline calls and back.

pub mod admin;
pub mod chat;
pub mod messages;
pub mod oauth;
pub mod request_id;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};

use crate::pipeline::GatewayState;

/// Build the gateway's axum router.
pub fn router(state: Arc<GatewayState>) -> Router {
    Router::new()
        // Chat surfaces
        .route("/v1/messages", post(messages::create_message))
        .route("/v1/messages/count_tokens", post(messages::count_tokens))
        .route("/v1/messages/chat-template", post(messages::chat_template))
        .route("/v1/chat/completions", post(chat::chat_completions))
        // Introspection
        .route("/healthz", get(admin::healthz))
        .route("/v1/models", get(admin::list_models))
        .route("/backends/status", get(admin::backends_status))
        .route("/cache/stats", get(admin::cache_stats))
        .route("/cache/clear", post(admin::cache_clear))
        // OAuth collaborator surface
        .route("/oauth/authorize", get(oauth::authorize).post(oauth::authorize))
        .route("/oauth/callback", get(oauth::callback).post(oauth::callback))
        .route("/oauth/status", get(oauth::status))
        .route("/oauth/refresh", post(oauth::refresh))
        .route("/oauth/logout", post(oauth::logout))
        .layer(axum::middleware::from_fn(request_id::assign_request_id))
        .with_state(state)
}
