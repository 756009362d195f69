//! OpenAI Chat Completions shim.
//!
//! `/v1/chat/completions` accepts and returns the OpenAI shape. Internally
//! the body is translated to the canonical model, run through the same
//! pipeline as `/v1/messages`, and the result translated back — including
//! streaming, where Anthropic events are re-encoded as OpenAI chunks ending
//! with `data: [DONE]`.

use std::{convert::Infallible, sync::Arc};

use axum::{
    extract::State,
    http::HeaderMap,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures_util::StreamExt as _;
use serde_json::Value;

use crate::{
    error::GatewayError,
    pipeline::{self, GatewayState, PipelineResponse},
    translate::{self, AnthropicToOpenAi},
};

use super::messages::overrides_from_headers;

/// `POST /v1/chat/completions`.
pub async fn chat_completions(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    match run(state, &headers, body).await {
        Ok(response) => response,
        // This surface speaks OpenAI, including its error envelope.
        Err(err) => (err.status(), Json(err.openai_body())).into_response(),
    }
}

async fn run(
    state: Arc<GatewayState>,
    headers: &HeaderMap,
    body: Value,
) -> Result<Response, GatewayError> {
    let req = translate::request_from_openai(&body)?;

    let mut overrides = overrides_from_headers(headers);
    // OpenAI clients authenticate with `Authorization: Bearer …`; accept it
    // as equivalent to `x-api-key`.
    if overrides.api_key.is_none() {
        overrides.api_key = headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .filter(|v| !v.is_empty())
            .map(String::from);
    }

    match pipeline::handle(&state, req, overrides).await? {
        PipelineResponse::Unary(anthropic_body) => {
            Ok(Json(translate::response_to_openai(&anthropic_body)).into_response())
        }
        PipelineResponse::Stream(stream) => {
            let mut encoder = AnthropicToOpenAi::new();
            let mut finished = false;
            let sse_stream = stream
                .map(move |item| -> Vec<Result<Event, Infallible>> {
                    match item {
                        Ok(event) => {
                            let done = event.event == "message_stop";
                            let mut out: Vec<Result<Event, Infallible>> = encoder
                                .push_event(&event)
                                .into_iter()
                                .map(|chunk| Ok(Event::default().data(chunk.to_string())))
                                .collect();
                            if done && !finished {
                                finished = true;
                                out.push(Ok(Event::default().data("[DONE]")));
                            }
                            out
                        }
                        Err(err) => {
                            vec![Ok(Event::default().data(err.openai_body().to_string()))]
                        }
                    }
                })
                .flat_map(futures_util::stream::iter);
            Ok(Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::{to_bytes, Body},
        http::{Request, StatusCode},
    };
    use serde_json::json;
    use std::sync::Arc;
    use tower::ServiceExt as _;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::config::Config;

    async fn app_with_backend(server: &MockServer) -> axum::Router {
        let config: Config = serde_json::from_value(json!({
            "backends": {
                "mock": { "base_url": server.uri(), "timeout_seconds": 5 },
            },
            "model_providers": { "test-model": "mock" },
        }))
        .unwrap();
        config.validate().unwrap();
        crate::api::router(Arc::new(GatewayState::new(Arc::new(config))))
    }

    async fn post(app: axum::Router, body: Value, bearer: Option<&str>) -> (StatusCode, Vec<u8>) {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/v1/chat/completions")
            .header("content-type", "application/json");
        if let Some(token) = bearer {
            builder = builder.header("authorization", format!("Bearer {token}"));
        }
        let response = app
            .oneshot(builder.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, bytes.to_vec())
    }

    fn completion(text: &str) -> Value {
        json!({
            "id": "cmpl-1",
            "choices": [{
                "index": 0,
                "message": { "role": "assistant", "content": text },
                "finish_reason": "stop",
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 2 },
        })
    }

    #[tokio::test]
    async fn unary_round_trip_stays_openai_shaped() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("shimmed")))
            .mount(&server)
            .await;

        let app = app_with_backend(&server).await;
        let (status, bytes) = post(
            app,
            json!({
                "model": "test-model",
                "messages": [{ "role": "user", "content": "hi" }],
            }),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["object"], "chat.completion");
        assert_eq!(body["choices"][0]["message"]["content"], "shimmed");
        assert_eq!(body["choices"][0]["finish_reason"], "stop");
    }

    #[tokio::test]
    async fn bearer_token_is_forwarded_as_upstream_credential() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(completion("ok")))
            .mount(&server)
            .await;

        let app = app_with_backend(&server).await;
        // The bearer lands in RequestOverrides.api_key; for OpenAI-compatible
        // backends the configured (absent) key still applies upstream, so the
        // request simply succeeds — the point is it must not 401 at the edge.
        let (status, _) = post(
            app,
            json!({
                "model": "test-model",
                "messages": [{ "role": "user", "content": "hi" }],
            }),
            Some("sk-client"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn errors_use_the_openai_envelope() {
        let server = MockServer::start().await;
        let app = app_with_backend(&server).await;

        let (status, bytes) = post(
            app,
            json!({ "messages": [{ "role": "user", "content": "hi" }] }), // no model
            None,
        )
        .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"]["message"].as_str().unwrap().contains("model"));
        assert_eq!(body["error"]["type"], "bad_request");
        assert!(body.get("type").is_none(), "must not be the Anthropic envelope");
    }

    #[tokio::test]
    async fn streaming_emits_openai_chunks_and_done() {
        let sse = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"ab\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"c\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(json!({ "stream": true })))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "text/event-stream")
                    .set_body_string(sse),
            )
            .mount(&server)
            .await;

        let app = app_with_backend(&server).await;
        let (status, bytes) = post(
            app,
            json!({
                "model": "test-model",
                "stream": true,
                "messages": [{ "role": "user", "content": "hi" }],
            }),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        let text = String::from_utf8(bytes).unwrap();
        assert!(text.contains("chat.completion.chunk"));
        assert!(text.contains("\"content\":\"ab\""));
        assert!(text.contains("\"finish_reason\":\"stop\""));
        assert!(text.trim_end().ends_with("data: [DONE]"));
    }

    #[tokio::test]
    async fn upstream_auth_failure_maps_to_openai_401() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer sk-config")) // never sent
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(401).set_body_string("no key"))
            .mount(&server)
            .await;

        let app = app_with_backend(&server).await;
        let (status, bytes) = post(
            app,
            json!({
                "model": "test-model",
                "messages": [{ "role": "user", "content": "hi" }],
            }),
            None,
        )
        .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["error"]["type"], "auth_failed");
    }
}
