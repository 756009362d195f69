//! Canonical request model — the Anthropic Messages shape.
//!
//! Every adapter consumes [`CanonicalRequest`]; the OpenAI-compatible adapter
//! translates it at the edge (see [`crate::translate`]). Inbound
//! `/v1/messages` bodies deserialize directly into this type; inbound
//! `/v1/chat/completions` bodies are converted by the translator first.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A chat request normalised to the Anthropic Messages schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalRequest {
    /// Model id as seen by the client (after override substitution).
    pub model: String,

    pub messages: Vec<Message>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system: Option<SystemPrompt>,

    /// Required by the Anthropic wire format. Must be positive.
    pub max_tokens: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tools: Option<Vec<Tool>>,

    #[serde(default)]
    pub stream: bool,

    /// Free-form client metadata. Never fingerprinted, never forwarded to
    /// non-Anthropic backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl CanonicalRequest {
    /// Shape validation beyond what serde enforces.
    ///
    /// Returns a human-readable description of the first violation found.
    pub fn validate(&self) -> Result<(), String> {
        if self.model.is_empty() {
            return Err("`model` must be a non-empty string".into());
        }
        if self.messages.is_empty() {
            return Err("`messages` must contain at least one message".into());
        }
        if self.max_tokens == 0 {
            return Err("`max_tokens` must be a positive integer".into());
        }
        for (i, msg) in self.messages.iter().enumerate() {
            if let MessageContent::Blocks(blocks) = &msg.content {
                if blocks.is_empty() {
                    return Err(format!("messages[{i}].content is an empty block array"));
                }
            }
        }
        Ok(())
    }

    /// Concatenated text of all message content, newest last.
    ///
    /// Used by the classifier and the token-count heuristic; images and tool
    /// payloads are skipped.
    pub fn flat_text(&self) -> String {
        let mut out = String::new();
        if let Some(system) = &self.system {
            out.push_str(&system.flat_text());
            out.push('\n');
        }
        for msg in &self.messages {
            out.push_str(&msg.flat_text());
            out.push('\n');
        }
        out
    }

    /// Text of the last user message, if any. The classifier keys off this.
    pub fn last_user_text(&self) -> Option<String> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(Message::flat_text)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    /// OpenAI-style tool message. Normalised into a `user` message carrying a
    /// `tool_result` block before any Anthropic wire call.
    Tool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: MessageContent,
}

impl Message {
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self { role, content: MessageContent::Text(text.into()) }
    }

    /// All text carried by this message, block boundaries joined by newlines.
    pub fn flat_text(&self) -> String {
        match &self.content {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Message content — plain string or an ordered block sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        source: ImageSource,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<ToolResultContent>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        is_error: Option<bool>,
    },
}

/// Base64 image payload in the Anthropic `source` form.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageSource {
    /// Always `"base64"` on this wire.
    #[serde(rename = "type")]
    pub kind: String,
    pub media_type: String,
    pub data: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ToolResultContent {
    Text(String),
    Blocks(Vec<ContentBlock>),
}

impl ToolResultContent {
    pub fn flat_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .filter_map(|b| match b {
                    ContentBlock::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

/// Top-level system prompt — string or text-block sequence.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SystemPrompt {
    Text(String),
    Blocks(Vec<SystemBlock>),
}

impl SystemPrompt {
    pub fn flat_text(&self) -> String {
        match self {
            Self::Text(t) => t.clone(),
            Self::Blocks(blocks) => blocks
                .iter()
                .map(|b| b.text.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemBlock {
    /// Always `"text"`.
    #[serde(rename = "type")]
    pub kind: String,
    pub text: String,
}

/// Tool definition in the Anthropic shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub input_schema: Value,
}
