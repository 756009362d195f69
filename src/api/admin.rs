//! Operator-facing introspection endpoints.

use std::{sync::Arc, time::Instant};

use axum::{extract::State, response::IntoResponse, Json};
use serde_json::{json, Value};

use crate::{
    backends::BackendClient,
    pipeline::{self, GatewayState, RequestOverrides},
};

/// `GET /healthz` — liveness probe for container orchestration.
pub async fn healthz(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// `GET /v1/models` — the models this gateway can route, OpenAI list shape.
///
/// Covers explicit `model_providers` entries plus override targets; clients
/// (LM Studio frontends in particular) use this for discovery.
pub async fn list_models(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let config = state.config();

    let mut ids: Vec<&String> = config.model_providers.keys().collect();
    for target in config.model_overrides.values() {
        if !ids.contains(&target) {
            ids.push(target);
        }
    }
    ids.sort();

    let data: Vec<Value> = ids
        .into_iter()
        .map(|id| {
            json!({
                "id": id,
                "object": "model",
                "owned_by": config.backend_for_model(id).unwrap_or_else(|| "unknown".into()),
            })
        })
        .collect();

    Json(json!({ "object": "list", "data": data }))
}

/// `GET /backends/status` — probe every configured backend and report
/// models currently on cool-down.
pub async fn backends_status(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let config = state.config();
    let mut backends: Vec<Value> = Vec::with_capacity(config.backends.len());

    let mut names: Vec<&String> = config.backends.keys().collect();
    names.sort();

    for name in names {
        let backend_cfg = &config.backends[name];
        let auth =
            pipeline::anthropic_auth(&state, backend_cfg, &RequestOverrides::default()).await;
        match BackendClient::new(backend_cfg, auth) {
            Ok(client) => {
                let health = client.health().await;
                let mut entry = serde_json::to_value(&health).unwrap_or_else(|_| json!({}));
                entry["name"] = json!(name);
                backends.push(entry);
            }
            Err(e) => backends.push(json!({
                "name": name,
                "ok": false,
                "latency_ms": 0,
                "error": e.to_string(),
            })),
        }
    }

    let disabled_models: Vec<Value> = state
        .availability
        .snapshot(Instant::now())
        .into_iter()
        .map(|(model, remaining)| {
            json!({ "model": model, "reenabled_in_seconds": remaining.as_secs() })
        })
        .collect();

    Json(json!({ "backends": backends, "disabled_models": disabled_models }))
}

/// `GET /cache/stats`.
pub async fn cache_stats(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    Json(state.cache.stats())
}

/// `POST /cache/clear`.
pub async fn cache_clear(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let cleared = state.cache.clear();
    tracing::info!(cleared, "cache cleared by operator");
    Json(json!({ "cleared": cleared }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use bytes::Bytes;
    use serde_json::json;
    use std::time::Duration;
    use tower::ServiceExt as _;

    use crate::config::Config;

    /// All builtin backend names pinned to loopback so health probes fail
    /// fast without touching the network.
    fn test_state() -> Arc<GatewayState> {
        let config: Config = serde_json::from_value(json!({
            "backends": {
                "lm-studio": { "base_url": "http://127.0.0.1:59990/v1", "timeout_seconds": 1 },
                "anthropic": { "kind": "anthropic",
                               "base_url": "http://127.0.0.1:59991",
                               "api_key": "sk-test", "timeout_seconds": 1 },
                "openai": { "base_url": "http://127.0.0.1:59992/v1", "timeout_seconds": 1 },
                "openrouter": { "base_url": "http://127.0.0.1:59993/v1", "timeout_seconds": 1 },
            },
            "model_providers": {
                "qwen2.5-coder-32b": "lm-studio",
                "claude-3-5-sonnet-20241022": "anthropic",
            },
            "model_overrides": { "old-model": "qwen2.5-coder-32b" },
        }))
        .unwrap();
        Arc::new(GatewayState::new(Arc::new(config)))
    }

    async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap_or(Value::Null))
    }

    #[tokio::test]
    async fn healthz_is_ok() {
        let app = crate::api::router(test_state());
        let (status, body) = get_json(app, "/healthz").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn models_list_includes_providers_and_override_targets() {
        let app = crate::api::router(test_state());
        let (status, body) = get_json(app, "/v1/models").await;

        assert_eq!(status, StatusCode::OK);
        let ids: Vec<&str> = body["data"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|m| m["id"].as_str())
            .collect();
        assert!(ids.contains(&"qwen2.5-coder-32b"));
        assert!(ids.contains(&"claude-3-5-sonnet-20241022"));
    }

    #[tokio::test]
    async fn cache_stats_and_clear_round_trip() {
        let state = test_state();
        state.cache.put(
            "fp-test".into(),
            Bytes::from_static(b"{}"),
            "application/json",
            Instant::now(),
        );

        let app = crate::api::router(Arc::clone(&state));
        let (_, stats) = get_json(app.clone(), "/cache/stats").await;
        assert_eq!(stats["size"], 1);
        assert_eq!(stats["max_size"], 1000);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/cache/clear")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["cleared"], 1);

        let (_, stats) = get_json(app, "/cache/stats").await;
        assert_eq!(stats["size"], 0);
    }

    #[tokio::test]
    async fn backends_status_lists_disabled_models() {
        let state = test_state();
        state
            .availability
            .disable("qwen2.5-coder-32b", Instant::now(), Duration::from_secs(300));

        let app = crate::api::router(Arc::clone(&state));
        let (status, body) = get_json(app, "/backends/status").await;

        assert_eq!(status, StatusCode::OK);
        let disabled = body["disabled_models"].as_array().unwrap();
        assert_eq!(disabled.len(), 1);
        assert_eq!(disabled[0]["model"], "qwen2.5-coder-32b");
        assert!(disabled[0]["reenabled_in_seconds"].as_u64().unwrap() <= 300);

        // Every configured backend appears, reachable or not.
        let names: Vec<&str> = body["backends"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|b| b["name"].as_str())
            .collect();
        assert!(names.contains(&"lm-studio"));
        assert!(names.contains(&"anthropic"));
    }
}
