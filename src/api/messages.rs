//! Anthropic-format endpoints: `/v1/messages` and its utility siblings.

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
use serde_json::{json, Value};

use crate::{
    backends,
    error::GatewayError,
    pipeline::{self, GatewayState, PipelineResponse, RequestOverrides},
    translate,
    types::CanonicalRequest,
};

/// Per-request overrides the gateway honors from headers.
pub(crate) fn overrides_from_headers(headers: &HeaderMap) -> RequestOverrides {
    let get = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
            .map(String::from)
    };
    RequestOverrides {
        backend: get("x-backend"),
        api_key: get("x-api-key"),
        anthropic_version: get("anthropic-version"),
    }
}

/// `POST /v1/messages` — Anthropic Messages shape in and out.
///
/// Streaming is controlled by `"stream": true` in the body; streamed
/// responses use `text/event-stream` with Anthropic's event names.
pub async fn create_message(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Result<Response, GatewayError> {
    let req: CanonicalRequest = serde_json::from_value(body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?;
    let overrides = overrides_from_headers(&headers);

    match pipeline::handle(&state, req, overrides).await? {
        PipelineResponse::Unary(body) => Ok(Json(body).into_response()),
        PipelineResponse::Stream(stream) => Ok(sse_response(stream)),
    }
}

/// Frame an event stream as SSE. Mid-stream failures become a terminal
/// Anthropic `error` event — the status line has already been sent.
pub(crate) fn sse_response(stream: crate::backends::EventStream) -> Response {
    let sse_stream = stream.map(|item| -> Result<Event, Infallible> {
        Ok(match item {
            Ok(event) => Event::default().event(event.event).data(event.data.to_string()),
            Err(err) => Event::default()
                .event("error")
                .data(err.anthropic_body().to_string()),
        })
    });
    Sse::new(sse_stream).keep_alive(KeepAlive::default()).into_response()
}

/// `POST /v1/messages/count_tokens` — best-effort local estimate.
///
/// Accepts the counting shape (no `max_tokens` required).
pub async fn count_tokens(
    Json(mut body): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
    // The counting endpoint omits max_tokens; satisfy the request shape.
    if let Some(obj) = body.as_object_mut() {
        obj.entry("max_tokens").or_insert(json!(1));
    }
    let req: CanonicalRequest = serde_json::from_value(body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?;
    req.validate().map_err(GatewayError::BadRequest)?;

    Ok(Json(json!({ "input_tokens": backends::count_tokens(&req) })))
}

/// `POST /v1/messages/chat-template` — echo the conversation rendered as a
/// Hugging Face chat-template string. No upstream call.
pub async fn chat_template(
    Json(mut body): Json<Value>,
) -> Result<Json<Value>, GatewayError> {
    if let Some(obj) = body.as_object_mut() {
        obj.entry("max_tokens").or_insert(json!(1));
    }
    let req: CanonicalRequest = serde_json::from_value(body)
        .map_err(|e| GatewayError::BadRequest(format!("invalid request body: {e}")))?;
    req.validate().map_err(GatewayError::BadRequest)?;

    Ok(Json(json!({ "chat_template": translate::to_chat_template(&req) })))
}
