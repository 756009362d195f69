//! HTTP surface of the OAuth collaborator.
//!
//! Thin wrappers over [`crate::oauth::OAuthManager`]; all token mechanics
//! (PKCE, exchange, refresh, persistence) live there.

use std::{collections::HashMap, sync::Arc};

use axum::{
    extract::{Query, State},
    Json,
};
use serde_json::{json, Value};

use crate::{error::GatewayError, pipeline::GatewayState};

/// `GET|POST /oauth/authorize` — start a PKCE round; returns the URL the
/// operator opens in a browser.
pub async fn authorize(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, GatewayError> {
    let url = state.oauth.authorize_url().await?;
    Ok(Json(json!({ "authorize_url": url })))
}

/// `GET|POST /oauth/callback` — exchange the pasted code for tokens.
/// Accepts `?code=…` or a JSON body `{"code": "…"}`.
pub async fn callback(
    State(state): State<Arc<GatewayState>>,
    Query(query): Query<HashMap<String, String>>,
    body: String,
) -> Result<Json<Value>, GatewayError> {
    let code = query
        .get("code")
        .cloned()
        .or_else(|| {
            serde_json::from_str::<Value>(&body)
                .ok()
                .and_then(|b| b["code"].as_str().map(String::from))
        })
        .ok_or_else(|| GatewayError::BadRequest("missing `code` parameter".into()))?;

    state.oauth.handle_callback(&code).await?;
    Ok(Json(json!({ "authenticated": true })))
}

/// `GET /oauth/status`.
pub async fn status(State(state): State<Arc<GatewayState>>) -> Json<Value> {
    Json(state.oauth.status().await)
}

/// `POST /oauth/refresh` — force a token refresh now.
pub async fn refresh(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, GatewayError> {
    let expires_at = state.oauth.refresh().await?;
    Ok(Json(json!({ "refreshed": true, "expires_at": expires_at.to_rfc3339() })))
}

/// `POST /oauth/logout` — drop the session and its persisted tokens.
pub async fn logout(
    State(state): State<Arc<GatewayState>>,
) -> Result<Json<Value>, GatewayError> {
    state.oauth.logout().await?;
    Ok(Json(json!({ "logged_out": true })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use tower::ServiceExt as _;

    use crate::config::Config;

    fn app() -> axum::Router {
        // No providers_auth: the channel is disabled.
        let config: Config = serde_json::from_str("{}").unwrap();
        crate::api::router(Arc::new(GatewayState::new(Arc::new(config))))
    }

    async fn request(app: axum::Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn status_reports_disabled_channel() {
        let (status, body) = request(app(), "GET", "/oauth/status").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enabled"], false);
        assert_eq!(body["authenticated"], false);
    }

    #[tokio::test]
    async fn authorize_without_client_id_is_bad_request() {
        let (status, body) = request(app(), "GET", "/oauth/authorize").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["type"], "bad_request");
    }

    #[tokio::test]
    async fn callback_requires_code() {
        let (status, body) = request(app(), "POST", "/oauth/callback").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"]["message"].as_str().unwrap().contains("code"));
    }

    #[tokio::test]
    async fn refresh_without_session_is_bad_request() {
        let (status, _) = request(app(), "POST", "/oauth/refresh").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn logout_is_idempotent() {
        let (status, body) = request(app(), "POST", "/oauth/logout").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["logged_out"], true);
    }
}
