pub mod anthropic;
pub mod client;
pub mod error;
pub mod retry;

pub use anthropic::AnthropicClient;
pub use client::{
    ChatChoice, ChatClient, ChatMessage, ChatRole, ContentPart, EmbeddingClient, MessageContent,
    ToolCallOut, ToolDefinition,
};
pub use error::LlmError;
