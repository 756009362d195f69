//! Format translation between the canonical (Anthropic-shaped) model and the
//! OpenAI chat-completions wire.
//!
//! Everything here is pure: unary translation is plain functions over JSON,
//! and the two streaming translators keep only the block-bookkeeping state
//! the event models force on them (current block index, whether a block is
//! open, accumulated tool-argument fragments).
//!
//! # Key mappings
//!
//! | Canonical (Anthropic) | OpenAI |
//! |---|---|
//! | top-level `system` | leading `role: system` message |
//! | text blocks | `content` string, or multimodal array when mixed |
//! | `image{media_type, data}` | `image_url` with a `data:` URL |
//! | `tool_use{id, name, input}` | assistant `tool_calls[]` (JSON-string args) |
//! | `tool_result{tool_use_id, …}` | `role: tool` message with `tool_call_id` |
//! | `stop_sequences` | `stop` |
//! | `end_turn` / `max_tokens` / `tool_use` | `stop` / `length` / `tool_calls` |

use serde_json::{json, Map, Value};
use uuid::Uuid;

use crate::{
    error::GatewayError,
    types::{
        CanonicalRequest, ContentBlock, Message, MessageContent, Role, SystemPrompt, Tool,
        ToolResultContent,
    },
};

/// Fallback `max_tokens` for OpenAI-shaped requests that omit it. The
/// canonical model requires the field.
const DEFAULT_MAX_TOKENS: u32 = 8_192;

// ──────────────────────────────────────────────────────────────────────────────
// Server-sent events
// ──────────────────────────────────────────────────────────────────────────────

/// One event in Anthropic's streaming taxonomy.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// `message_start`, `content_block_delta`, `ping`, …
    pub event: String,
    pub data: Value,
}

impl StreamEvent {
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self { event: event.into(), data }
    }

    /// Rough wire size, used for the cache-admission buffer cap.
    pub fn wire_len(&self) -> usize {
        self.event.len() + self.data.to_string().len() + 16
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Requests: canonical → OpenAI
// ──────────────────────────────────────────────────────────────────────────────

/// Render a canonical request as an OpenAI chat-completions body.
///
/// `top_k` and `metadata` are dropped: the OpenAI wire has no slot for them.
pub fn request_to_openai(req: &CanonicalRequest) -> Value {
    let mut messages: Vec<Value> = Vec::with_capacity(req.messages.len() + 1);

    if let Some(system) = &req.system {
        messages.push(json!({ "role": "system", "content": system.flat_text() }));
    }

    for msg in &req.messages {
        openai_messages_for(msg, &mut messages);
    }

    let mut body = json!({
        "model": req.model,
        "messages": messages,
        "max_tokens": req.max_tokens,
    });

    if let Some(t) = req.temperature {
        body["temperature"] = json!(t);
    }
    if let Some(p) = req.top_p {
        body["top_p"] = json!(p);
    }
    if let Some(stops) = &req.stop_sequences {
        body["stop"] = json!(stops);
    }
    if let Some(tools) = &req.tools {
        let mapped: Vec<Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.name,
                        "description": t.description,
                        "parameters": t.input_schema,
                    },
                })
            })
            .collect();
        body["tools"] = json!(mapped);
    }

    body
}

/// Expand one canonical message into one or more OpenAI wire messages.
///
/// `tool_result` blocks become standalone `role: tool` messages; whatever
/// text/image content remains keeps the original role.
fn openai_messages_for(msg: &Message, out: &mut Vec<Value>) {
    let role = match msg.role {
        Role::User | Role::Tool => "user",
        Role::Assistant => "assistant",
    };

    let blocks = match &msg.content {
        MessageContent::Text(text) => {
            out.push(json!({ "role": role, "content": text }));
            return;
        }
        MessageContent::Blocks(blocks) => blocks,
    };

    let mut parts: Vec<Value> = Vec::new();
    let mut tool_calls: Vec<Value> = Vec::new();
    let mut text_only = true;

    for block in blocks {
        match block {
            ContentBlock::Text { text } => {
                parts.push(json!({ "type": "text", "text": text }));
            }
            ContentBlock::Image { source } => {
                text_only = false;
                let url = format!("data:{};base64,{}", source.media_type, source.data);
                parts.push(json!({ "type": "image_url", "image_url": { "url": url } }));
            }
            ContentBlock::ToolUse { id, name, input } => {
                tool_calls.push(json!({
                    "id": id,
                    "type": "function",
                    "function": {
                        "name": name,
                        "arguments": input.to_string(),
                    },
                }));
            }
            ContentBlock::ToolResult { tool_use_id, content, .. } => {
                let text = content.as_ref().map(ToolResultContent::flat_text).unwrap_or_default();
                out.push(json!({
                    "role": "tool",
                    "tool_call_id": tool_use_id,
                    "content": text,
                }));
            }
        }
    }

    if !tool_calls.is_empty() {
        // Assistant tool-call message; any accompanying text rides along.
        let text: String = parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n");
        let content = if text.is_empty() { Value::Null } else { json!(text) };
        out.push(json!({
            "role": "assistant",
            "content": content,
            "tool_calls": tool_calls,
        }));
        return;
    }

    if parts.is_empty() {
        return;
    }

    let content = if text_only {
        // Pure text collapses to the plain-string form.
        json!(parts
            .iter()
            .filter_map(|p| p["text"].as_str())
            .collect::<Vec<_>>()
            .join("\n"))
    } else {
        json!(parts)
    };
    out.push(json!({ "role": role, "content": content }));
}

// ──────────────────────────────────────────────────────────────────────────────
// Requests: OpenAI → canonical
// ──────────────────────────────────────────────────────────────────────────────

/// Parse an OpenAI chat-completions body into a canonical request.
///
/// System messages are hoisted to the top-level `system` field (multiple
/// ones concatenated); `role: tool` messages become user messages carrying a
/// `tool_result` block.
pub fn request_from_openai(body: &Value) -> Result<CanonicalRequest, GatewayError> {
    let model = body["model"]
        .as_str()
        .ok_or_else(|| GatewayError::BadRequest("`model` field is required".into()))?
        .to_string();

    let raw_messages = body["messages"]
        .as_array()
        .ok_or_else(|| GatewayError::BadRequest("`messages` array is required".into()))?;

    let mut system_parts: Vec<String> = Vec::new();
    let mut messages: Vec<Message> = Vec::with_capacity(raw_messages.len());

    for raw in raw_messages {
        match raw["role"].as_str() {
            Some("system") | Some("developer") => {
                if let Some(text) = raw["content"].as_str() {
                    system_parts.push(text.to_string());
                }
            }
            Some("tool") => {
                let tool_use_id = raw["tool_call_id"].as_str().unwrap_or_default().to_string();
                let text = raw["content"].as_str().unwrap_or_default().to_string();
                messages.push(Message {
                    role: Role::User,
                    content: MessageContent::Blocks(vec![ContentBlock::ToolResult {
                        tool_use_id,
                        content: Some(ToolResultContent::Text(text)),
                        is_error: None,
                    }]),
                });
            }
            Some("user") => messages.push(Message {
                role: Role::User,
                content: canonical_content_from_openai(raw)?,
            }),
            Some("assistant") => messages.push(Message {
                role: Role::Assistant,
                content: assistant_content_from_openai(raw)?,
            }),
            other => {
                return Err(GatewayError::BadRequest(format!(
                    "unsupported message role: {other:?}"
                )))
            }
        }
    }

    let max_tokens = body["max_tokens"]
        .as_u64()
        .or_else(|| body["max_completion_tokens"].as_u64())
        .map(|v| v as u32)
        .unwrap_or(DEFAULT_MAX_TOKENS);

    let stop_sequences = match &body["stop"] {
        Value::String(s) => Some(vec![s.clone()]),
        Value::Array(items) => Some(
            items
                .iter()
                .filter_map(|v| v.as_str().map(String::from))
                .collect(),
        ),
        _ => None,
    };

    let tools = body["tools"].as_array().map(|tools| {
        tools
            .iter()
            .filter_map(|t| {
                let f = &t["function"];
                Some(Tool {
                    name: f["name"].as_str()?.to_string(),
                    description: f["description"].as_str().map(String::from),
                    input_schema: f
                        .get("parameters")
                        .cloned()
                        .unwrap_or_else(|| json!({ "type": "object" })),
                })
            })
            .collect::<Vec<_>>()
    });

    let system = if system_parts.is_empty() {
        None
    } else {
        Some(SystemPrompt::Text(system_parts.join("\n\n")))
    };

    Ok(CanonicalRequest {
        model,
        messages,
        system,
        max_tokens,
        temperature: body["temperature"].as_f64(),
        top_p: body["top_p"].as_f64(),
        top_k: None,
        stop_sequences,
        tools,
        stream: body["stream"].as_bool().unwrap_or(false),
        metadata: body.get("metadata").cloned(),
    })
}

/// User-message content: plain string or OpenAI multimodal array.
fn canonical_content_from_openai(raw: &Value) -> Result<MessageContent, GatewayError> {
    match &raw["content"] {
        Value::String(text) => Ok(MessageContent::Text(text.clone())),
        Value::Array(parts) => {
            let mut blocks = Vec::with_capacity(parts.len());
            for part in parts {
                match part["type"].as_str() {
                    Some("text") => blocks.push(ContentBlock::Text {
                        text: part["text"].as_str().unwrap_or_default().to_string(),
                    }),
                    Some("image_url") => {
                        let url = part["image_url"]["url"].as_str().unwrap_or_default();
                        blocks.push(image_block_from_data_url(url)?);
                    }
                    other => {
                        return Err(GatewayError::BadRequest(format!(
                            "unsupported content part type: {other:?}"
                        )))
                    }
                }
            }
            Ok(MessageContent::Blocks(blocks))
        }
        _ => Err(GatewayError::BadRequest(
            "message `content` must be a string or array".into(),
        )),
    }
}

/// Assistant content, folding `tool_calls` into `tool_use` blocks.
fn assistant_content_from_openai(raw: &Value) -> Result<MessageContent, GatewayError> {
    let mut blocks: Vec<ContentBlock> = Vec::new();

    if let Some(text) = raw["content"].as_str() {
        if !text.is_empty() {
            blocks.push(ContentBlock::Text { text: text.to_string() });
        }
    }

    if let Some(calls) = raw["tool_calls"].as_array() {
        for call in calls {
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            blocks.push(ContentBlock::ToolUse {
                id: call["id"].as_str().unwrap_or_default().to_string(),
                name: call["function"]["name"].as_str().unwrap_or_default().to_string(),
                input,
            });
        }
    }

    if blocks.is_empty() {
        return Ok(MessageContent::Text(String::new()));
    }
    if blocks.len() == 1 {
        if let ContentBlock::Text { text } = &blocks[0] {
            return Ok(MessageContent::Text(text.clone()));
        }
    }
    Ok(MessageContent::Blocks(blocks))
}

fn image_block_from_data_url(url: &str) -> Result<ContentBlock, GatewayError> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| GatewayError::BadRequest("image_url must be a data: URL".into()))?;
    let (media_type, data) = rest
        .split_once(";base64,")
        .ok_or_else(|| GatewayError::BadRequest("image data URL must be base64-encoded".into()))?;
    Ok(ContentBlock::Image {
        source: crate::types::ImageSource {
            kind: "base64".into(),
            media_type: media_type.to_string(),
            data: data.to_string(),
        },
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Responses
// ──────────────────────────────────────────────────────────────────────────────

/// OpenAI finish reason → Anthropic stop reason.
pub fn stop_reason_from_openai(finish: &str) -> &'static str {
    match finish {
        "stop" => "end_turn",
        "length" => "max_tokens",
        "tool_calls" => "tool_use",
        "content_filter" => "stop_sequence",
        _ => "end_turn",
    }
}

/// Anthropic stop reason → OpenAI finish reason.
pub fn finish_reason_to_openai(stop: &str) -> &'static str {
    match stop {
        "end_turn" | "stop_sequence" => "stop",
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}

/// Translate an OpenAI completion response into the Anthropic message shape.
///
/// `model` is the client-facing model id; upstreams frequently echo their own
/// internal name, which we do not leak.
pub fn response_from_openai(body: &Value, model: &str) -> Result<Value, GatewayError> {
    let choice = body["choices"]
        .as_array()
        .and_then(|c| c.first())
        .ok_or_else(|| GatewayError::Upstream("upstream response has no choices".into()))?;
    let message = &choice["message"];

    let mut content: Vec<Value> = Vec::new();
    if let Some(text) = message["content"].as_str() {
        if !text.is_empty() {
            content.push(json!({ "type": "text", "text": text }));
        }
    }
    if let Some(calls) = message["tool_calls"].as_array() {
        for call in calls {
            let arguments = call["function"]["arguments"].as_str().unwrap_or("{}");
            let input: Value = serde_json::from_str(arguments).unwrap_or(json!({}));
            content.push(json!({
                "type": "tool_use",
                "id": call["id"].as_str().unwrap_or_default(),
                "name": call["function"]["name"].as_str().unwrap_or_default(),
                "input": input,
            }));
        }
    }

    let stop_reason = choice["finish_reason"]
        .as_str()
        .map(stop_reason_from_openai)
        .unwrap_or("end_turn");

    let id = body["id"]
        .as_str()
        .map(|s| format!("msg_{s}"))
        .unwrap_or_else(|| format!("msg_{}", Uuid::new_v4().simple()));

    Ok(json!({
        "id": id,
        "type": "message",
        "role": "assistant",
        "model": model,
        "content": content,
        "stop_reason": stop_reason,
        "stop_sequence": Value::Null,
        "usage": {
            "input_tokens": body["usage"]["prompt_tokens"].as_u64().unwrap_or(0),
            "output_tokens": body["usage"]["completion_tokens"].as_u64().unwrap_or(0),
        },
    }))
}

/// Translate an Anthropic message response into the OpenAI completion shape.
pub fn response_to_openai(body: &Value) -> Value {
    let blocks = body["content"].as_array().cloned().unwrap_or_default();

    let text: String = blocks
        .iter()
        .filter(|b| b["type"] == "text")
        .filter_map(|b| b["text"].as_str())
        .collect::<Vec<_>>()
        .join("");

    let tool_calls: Vec<Value> = blocks
        .iter()
        .filter(|b| b["type"] == "tool_use")
        .map(|b| {
            json!({
                "id": b["id"],
                "type": "function",
                "function": {
                    "name": b["name"],
                    "arguments": b["input"].to_string(),
                },
            })
        })
        .collect();

    let mut message = Map::new();
    message.insert("role".into(), json!("assistant"));
    message.insert(
        "content".into(),
        if text.is_empty() && !tool_calls.is_empty() { Value::Null } else { json!(text) },
    );
    if !tool_calls.is_empty() {
        message.insert("tool_calls".into(), json!(tool_calls));
    }

    let finish_reason = body["stop_reason"]
        .as_str()
        .map(finish_reason_to_openai)
        .unwrap_or("stop");

    let input_tokens = body["usage"]["input_tokens"].as_u64().unwrap_or(0);
    let output_tokens = body["usage"]["output_tokens"].as_u64().unwrap_or(0);

    json!({
        "id": body["id"].as_str().map(|s| s.replace("msg_", "chatcmpl-")).unwrap_or_default(),
        "object": "chat.completion",
        "created": chrono::Utc::now().timestamp(),
        "model": body["model"],
        "choices": [{
            "index": 0,
            "message": Value::Object(message),
            "finish_reason": finish_reason,
        }],
        "usage": {
            "prompt_tokens": input_tokens,
            "completion_tokens": output_tokens,
            "total_tokens": input_tokens + output_tokens,
        },
    })
}

// ──────────────────────────────────────────────────────────────────────────────
// Streaming: OpenAI deltas → Anthropic events
// ──────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq)]
enum OpenBlock {
    Text,
    ToolUse,
}

/// Coalesces OpenAI stream chunks into Anthropic's block-oriented events.
///
/// Feed each parsed `data:` chunk to [`push_chunk`][Self::push_chunk]; call
/// [`finish`][Self::finish] on `[DONE]`.
pub struct OpenAiToAnthropic {
    message_id: String,
    model: String,
    started: bool,
    block_index: i64,
    open: Option<OpenBlock>,
    stop_reason: &'static str,
    output_tokens: u64,
    input_tokens: u64,
}

impl OpenAiToAnthropic {
    /// `model` is the client-facing id echoed in `message_start`.
    pub fn new(model: &str) -> Self {
        Self {
            message_id: format!("msg_{}", Uuid::new_v4().simple()),
            model: model.to_string(),
            started: false,
            block_index: -1,
            open: None,
            stop_reason: "end_turn",
            output_tokens: 0,
            input_tokens: 0,
        }
    }

    pub fn push_chunk(&mut self, chunk: &Value) -> Vec<StreamEvent> {
        let mut events = Vec::new();

        if !self.started {
            self.started = true;
            events.push(StreamEvent::new(
                "message_start",
                json!({
                    "type": "message_start",
                    "message": {
                        "id": self.message_id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.model,
                        "content": [],
                        "stop_reason": Value::Null,
                        "stop_sequence": Value::Null,
                        "usage": { "input_tokens": 0, "output_tokens": 0 },
                    },
                }),
            ));
        }

        if let Some(usage) = chunk.get("usage").filter(|u| u.is_object()) {
            self.input_tokens = usage["prompt_tokens"].as_u64().unwrap_or(self.input_tokens);
            self.output_tokens = usage["completion_tokens"].as_u64().unwrap_or(self.output_tokens);
        }

        let Some(choice) = chunk["choices"].as_array().and_then(|c| c.first()) else {
            return events;
        };

        let delta = &choice["delta"];

        if let Some(text) = delta["content"].as_str() {
            if !text.is_empty() {
                if self.open == Some(OpenBlock::ToolUse) {
                    events.push(self.close_block());
                }
                if self.open.is_none() {
                    self.block_index += 1;
                    self.open = Some(OpenBlock::Text);
                    events.push(StreamEvent::new(
                        "content_block_start",
                        json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": { "type": "text", "text": "" },
                        }),
                    ));
                }
                events.push(StreamEvent::new(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": self.block_index,
                        "delta": { "type": "text_delta", "text": text },
                    }),
                ));
            }
        }

        if let Some(calls) = delta["tool_calls"].as_array() {
            for call in calls {
                // A fragment with an `id` opens a new tool call.
                if let Some(id) = call["id"].as_str() {
                    if self.open.is_some() {
                        events.push(self.close_block());
                    }
                    self.block_index += 1;
                    self.open = Some(OpenBlock::ToolUse);
                    events.push(StreamEvent::new(
                        "content_block_start",
                        json!({
                            "type": "content_block_start",
                            "index": self.block_index,
                            "content_block": {
                                "type": "tool_use",
                                "id": id,
                                "name": call["function"]["name"].as_str().unwrap_or_default(),
                                "input": {},
                            },
                        }),
                    ));
                }
                if let Some(fragment) = call["function"]["arguments"].as_str() {
                    if !fragment.is_empty() {
                        events.push(StreamEvent::new(
                            "content_block_delta",
                            json!({
                                "type": "content_block_delta",
                                "index": self.block_index,
                                "delta": { "type": "input_json_delta", "partial_json": fragment },
                            }),
                        ));
                    }
                }
            }
        }

        if let Some(finish) = choice["finish_reason"].as_str() {
            self.stop_reason = stop_reason_from_openai(finish);
        }

        events
    }

    /// Terminal events for `[DONE]`: close the open block, then
    /// `message_delta` and `message_stop`.
    pub fn finish(&mut self) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        if self.open.is_some() {
            events.push(self.close_block());
        }
        events.push(StreamEvent::new(
            "message_delta",
            json!({
                "type": "message_delta",
                "delta": { "stop_reason": self.stop_reason, "stop_sequence": Value::Null },
                "usage": { "output_tokens": self.output_tokens },
            }),
        ));
        events.push(StreamEvent::new("message_stop", json!({ "type": "message_stop" })));
        events
    }

    fn close_block(&mut self) -> StreamEvent {
        self.open = None;
        StreamEvent::new(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": self.block_index }),
        )
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Streaming: Anthropic events → OpenAI chunks
// ──────────────────────────────────────────────────────────────────────────────

/// Re-encodes Anthropic events as OpenAI stream chunks for the
/// `/v1/chat/completions` shim. The caller frames each returned body as a
/// `data:` line and appends `data: [DONE]` after `message_stop`.
pub struct AnthropicToOpenAi {
    id: String,
    model: String,
    created: i64,
    tool_index: i64,
    stop_reason: Option<String>,
}

impl AnthropicToOpenAi {
    pub fn new() -> Self {
        Self {
            id: format!("chatcmpl-{}", Uuid::new_v4().simple()),
            model: String::new(),
            created: chrono::Utc::now().timestamp(),
            tool_index: -1,
            stop_reason: None,
        }
    }

    pub fn push_event(&mut self, ev: &StreamEvent) -> Vec<Value> {
        match ev.event.as_str() {
            "message_start" => {
                let message = &ev.data["message"];
                if let Some(model) = message["model"].as_str() {
                    self.model = model.to_string();
                }
                vec![self.chunk(json!({ "role": "assistant", "content": "" }), None)]
            }
            "content_block_start" => {
                let block = &ev.data["content_block"];
                if block["type"] == "tool_use" {
                    self.tool_index += 1;
                    vec![self.chunk(
                        json!({
                            "tool_calls": [{
                                "index": self.tool_index,
                                "id": block["id"],
                                "type": "function",
                                "function": { "name": block["name"], "arguments": "" },
                            }],
                        }),
                        None,
                    )]
                } else {
                    Vec::new()
                }
            }
            "content_block_delta" => match ev.data["delta"]["type"].as_str() {
                Some("text_delta") => {
                    let text = ev.data["delta"]["text"].as_str().unwrap_or_default();
                    vec![self.chunk(json!({ "content": text }), None)]
                }
                Some("input_json_delta") => {
                    let fragment = ev.data["delta"]["partial_json"].as_str().unwrap_or_default();
                    vec![self.chunk(
                        json!({
                            "tool_calls": [{
                                "index": self.tool_index.max(0),
                                "function": { "arguments": fragment },
                            }],
                        }),
                        None,
                    )]
                }
                _ => Vec::new(),
            },
            "message_delta" => {
                if let Some(stop) = ev.data["delta"]["stop_reason"].as_str() {
                    self.stop_reason = Some(finish_reason_to_openai(stop).to_string());
                }
                Vec::new()
            }
            "message_stop" => {
                let finish = self.stop_reason.clone().unwrap_or_else(|| "stop".into());
                vec![self.chunk(json!({}), Some(finish))]
            }
            _ => Vec::new(),
        }
    }

    fn chunk(&self, delta: Value, finish_reason: Option<String>) -> Value {
        json!({
            "id": self.id,
            "object": "chat.completion.chunk",
            "created": self.created,
            "model": self.model,
            "choices": [{
                "index": 0,
                "delta": delta,
                "finish_reason": finish_reason,
            }],
        })
    }
}

impl Default for AnthropicToOpenAi {
    fn default() -> Self {
        Self::new()
    }
}

// ──────────────────────────────────────────────────────────────────────────────
// Cache replay and stream reassembly
// ──────────────────────────────────────────────────────────────────────────────

/// Replay a cached unary message body as the event sequence a streaming
/// client expects. Text blocks replay as a single delta carrying the whole
/// text; tool blocks replay their input as one `input_json_delta`.
pub fn replay_as_events(body: &Value) -> Vec<StreamEvent> {
    let mut events = Vec::new();

    let mut skeleton = body.clone();
    if let Some(obj) = skeleton.as_object_mut() {
        obj.insert("content".into(), json!([]));
        obj.insert("stop_reason".into(), Value::Null);
    }
    events.push(StreamEvent::new(
        "message_start",
        json!({ "type": "message_start", "message": skeleton }),
    ));

    for (index, block) in body["content"].as_array().into_iter().flatten().enumerate() {
        match block["type"].as_str() {
            Some("text") => {
                events.push(StreamEvent::new(
                    "content_block_start",
                    json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": { "type": "text", "text": "" },
                    }),
                ));
                events.push(StreamEvent::new(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": { "type": "text_delta", "text": block["text"] },
                    }),
                ));
            }
            Some("tool_use") => {
                events.push(StreamEvent::new(
                    "content_block_start",
                    json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {
                            "type": "tool_use",
                            "id": block["id"],
                            "name": block["name"],
                            "input": {},
                        },
                    }),
                ));
                events.push(StreamEvent::new(
                    "content_block_delta",
                    json!({
                        "type": "content_block_delta",
                        "index": index,
                        "delta": {
                            "type": "input_json_delta",
                            "partial_json": block["input"].to_string(),
                        },
                    }),
                ));
            }
            _ => continue,
        }
        events.push(StreamEvent::new(
            "content_block_stop",
            json!({ "type": "content_block_stop", "index": index }),
        ));
    }

    events.push(StreamEvent::new(
        "message_delta",
        json!({
            "type": "message_delta",
            "delta": {
                "stop_reason": body["stop_reason"],
                "stop_sequence": body["stop_sequence"],
            },
            "usage": { "output_tokens": body["usage"]["output_tokens"] },
        }),
    ));
    events.push(StreamEvent::new("message_stop", json!({ "type": "message_stop" })));
    events
}

/// Rebuild the unary message body from a complete buffered event sequence.
///
/// Returns `None` when the sequence is structurally incomplete (no
/// `message_start` or no `message_stop`) — partial streams are never cached.
pub fn assemble_from_events(events: &[StreamEvent]) -> Option<Value> {
    let mut message: Option<Value> = None;
    let mut blocks: Vec<Value> = Vec::new();
    let mut pending_json: Vec<String> = Vec::new();
    let mut stop_reason = Value::Null;
    let mut stop_sequence = Value::Null;
    let mut output_tokens: Option<u64> = None;
    let mut stopped = false;

    for ev in events {
        match ev.event.as_str() {
            "message_start" => message = Some(ev.data["message"].clone()),
            "content_block_start" => {
                blocks.push(ev.data["content_block"].clone());
                pending_json.push(String::new());
            }
            "content_block_delta" => {
                let Some(block) = blocks.last_mut() else { continue };
                match ev.data["delta"]["type"].as_str() {
                    Some("text_delta") => {
                        if let Some(text) = block["text"].as_str() {
                            let appended =
                                format!("{text}{}", ev.data["delta"]["text"].as_str().unwrap_or(""));
                            block["text"] = json!(appended);
                        }
                    }
                    Some("input_json_delta") => {
                        if let Some(buf) = pending_json.last_mut() {
                            buf.push_str(ev.data["delta"]["partial_json"].as_str().unwrap_or(""));
                        }
                    }
                    _ => {}
                }
            }
            "content_block_stop" => {
                // Finalise accumulated tool arguments for the block just closed.
                if let (Some(block), Some(buf)) = (blocks.last_mut(), pending_json.last()) {
                    if block["type"] == "tool_use" && !buf.is_empty() {
                        block["input"] = serde_json::from_str(buf).unwrap_or(json!({}));
                    }
                }
            }
            "message_delta" => {
                stop_reason = ev.data["delta"]["stop_reason"].clone();
                stop_sequence = ev.data["delta"]["stop_sequence"].clone();
                if let Some(tokens) = ev.data["usage"]["output_tokens"].as_u64() {
                    output_tokens = Some(tokens);
                }
            }
            "message_stop" => stopped = true,
            _ => {}
        }
    }

    if !stopped {
        return None;
    }
    let mut message = message?;

    message["content"] = json!(blocks);
    message["stop_reason"] = stop_reason;
    message["stop_sequence"] = stop_sequence;
    if let Some(tokens) = output_tokens {
        message["usage"]["output_tokens"] = json!(tokens);
    }
    Some(message)
}

// ──────────────────────────────────────────────────────────────────────────────
// Chat-template rendering
// ──────────────────────────────────────────────────────────────────────────────

/// Render messages as a Hugging Face chat-template string (ChatML framing),
/// ending with an open assistant turn.
pub fn to_chat_template(req: &CanonicalRequest) -> String {
    let mut out = String::new();
    if let Some(system) = &req.system {
        out.push_str("<|im_start|>system\n");
        out.push_str(&system.flat_text());
        out.push_str("<|im_end|>\n");
    }
    for msg in &req.messages {
        let role = match msg.role {
            Role::User | Role::Tool => "user",
            Role::Assistant => "assistant",
        };
        out.push_str(&format!("<|im_start|>{role}\n"));
        out.push_str(&msg.flat_text());
        out.push_str("<|im_end|>\n");
    }
    out.push_str("<|im_start|>assistant\n");
    out
}

// ──────────────────────────────────────────────────────────────────────────────
// Tests
// ──────────────────────────────────────────────────────────────────────────────
