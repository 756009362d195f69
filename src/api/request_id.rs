//! Request-id middleware.
//!
//! Every inbound request gets an `x-request-id` — the caller's, when one is
//! supplied, or a fresh UUID v4. The id is held in a tracing span so every
//! log line for the request carries it, and echoed back in the response
//! headers so client-side reports can be matched to server logs.
//!
//! The id is deliberately excluded from cache fingerprints.

use axum::{extract::Request, http::HeaderValue, middleware::Next, response::Response};
use tracing::Instrument as _;
use uuid::Uuid;

pub async fn assign_request_id(req: Request, next: Next) -> Response {
    let id = req
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(String::from)
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let span = tracing::info_span!("request", id = %id);
    let mut response = next.run(req).instrument(span).await;

    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}
