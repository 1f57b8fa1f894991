//! The LLM client contract the conversation loop consumes.
//!
//! The core never depends on a specific provider — only on `ChatClient` and
//! `EmbeddingClient`. `aviary-conversation` and `aviary-tools` are generic
//! over these traits so a different concrete client can be swapped in
//! without touching turn logic.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::LlmError;

/// One entry in the message list sent to the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: MessageContent,
    /// Set on assistant messages that requested tool calls.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallOut>,
    /// Set on tool-role messages: which call this answers.
    pub tool_call_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A message payload may be plain text or a list of typed parts so vision
/// models can be addressed.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    pub fn text(s: impl Into<String>) -> Self {
        MessageContent::Text(s.into())
    }

    /// Best-effort flattening to plain text, used for logging and for the
    /// conversation log's stored user text.
    pub fn as_plain_text(&self) -> String {
        match self {
            MessageContent::Text(t) => t.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter_map(|p| match p {
                    ContentPart::Text { text } => Some(text.clone()),
                    _ => None,
                })
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
    ImageUrl { url: String },
    VideoUrl { url: String },
}

/// A tool definition sent alongside the chat request so the model knows
/// what it can call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// A tool call requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallOut {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// A model turn: either prose or a set of tool calls, never both in this
/// contract (a model that wants to think out loud before calling a tool
/// puts that text in a separate non-tool-call turn).
#[derive(Debug, Clone)]
pub enum ChatChoice {
    Text(String),
    ToolCalls(Vec<ToolCallOut>),
}

impl ChatChoice {
    pub fn tool_calls(&self) -> &[ToolCallOut] {
        match self {
            ChatChoice::ToolCalls(calls) => calls,
            ChatChoice::Text(_) => &[],
        }
    }

    pub fn text(&self) -> Option<&str> {
        match self {
            ChatChoice::Text(t) => Some(t),
            ChatChoice::ToolCalls(_) => None,
        }
    }
}

/// `Chat(messages, tool_definitions) -> choice`.
#[async_trait]
pub trait ChatClient: Send + Sync {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatChoice, LlmError>;
}

/// `Embed(text) -> float vector`.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError>;
}
