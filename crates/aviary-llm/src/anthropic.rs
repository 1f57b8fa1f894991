//! Concrete LLM client: Anthropic Messages API for chat, a configurable
//! OpenAI-compatible `/v1/embeddings` endpoint for embeddings.
//!
//! Anthropic Messages API request/response mapping: builds the wire
//! shape and auth header handling; trimmed to the single request/response
//! shape this spec's `ChatClient`/`EmbeddingClient` contract needs (no
//! streaming, no OAuth token exchange, no thinking-budget tuning — those
//! format and parses tool-use blocks back into the client contract.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::client::{
    ChatChoice, ChatClient, ChatMessage, ChatRole, ContentPart, EmbeddingClient, MessageContent,
    ToolCallOut, ToolDefinition,
};
use crate::error::LlmError;
use crate::retry::{classify_status, retry_with_backoff};

const API_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

pub struct AnthropicClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    embeddings_url: Option<String>,
    embeddings_api_key: Option<String>,
    embedding_model: String,
}

impl AnthropicClient {
    pub fn new(api_key: String, model: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: "https://api.anthropic.com".to_string(),
            model,
            embeddings_url: None,
            embeddings_api_key: None,
            embedding_model: "text-embedding-3-small".to_string(),
        }
    }

    pub fn with_embeddings(mut self, url: String, api_key: String, model: String) -> Self {
        self.embeddings_url = Some(url);
        self.embeddings_api_key = Some(api_key);
        self.embedding_model = model;
        self
    }

    fn to_api_messages(&self, messages: &[ChatMessage]) -> (Option<String>, Vec<serde_json::Value>) {
        let mut system = None;
        let mut out = Vec::with_capacity(messages.len());
        for m in messages {
            match m.role {
                ChatRole::System => {
                    system = Some(m.content.as_plain_text());
                }
                ChatRole::User => {
                    out.push(json!({ "role": "user", "content": content_to_blocks(&m.content) }));
                }
                ChatRole::Assistant => {
                    let mut blocks = content_to_blocks(&m.content);
                    for call in &m.tool_calls {
                        blocks.push(json!({
                            "type": "tool_use",
                            "id": call.id,
                            "name": call.name,
                            "input": call.arguments,
                        }));
                    }
                    out.push(json!({ "role": "assistant", "content": blocks }));
                }
                ChatRole::Tool => {
                    out.push(json!({
                        "role": "user",
                        "content": [{
                            "type": "tool_result",
                            "tool_use_id": m.tool_call_id.clone().unwrap_or_default(),
                            "content": m.content.as_plain_text(),
                        }]
                    }));
                }
            }
        }
        (system, out)
    }
}

fn content_to_blocks(content: &MessageContent) -> Vec<serde_json::Value> {
    match content {
        MessageContent::Text(t) => vec![json!({ "type": "text", "text": t })],
        MessageContent::Parts(parts) => parts
            .iter()
            .map(|p| match p {
                ContentPart::Text { text } => json!({ "type": "text", "text": text }),
                ContentPart::ImageUrl { url } => image_block(url),
                ContentPart::VideoUrl { url } => image_block(url),
            })
            .collect(),
    }
}

/// `url` is a `data:<mime>;base64,<data>` URI; decompose
/// it into Anthropic's base64 image source, or pass through as a URL source
/// if it isn't a data URI (e.g. a GIF embed thumbnail URL).
fn image_block(url: &str) -> serde_json::Value {
    if let Some(rest) = url.strip_prefix("data:") {
        if let Some((mime, data)) = rest.split_once(";base64,") {
            return json!({
                "type": "image",
                "source": { "type": "base64", "media_type": mime, "data": data }
            });
        }
    }
    json!({ "type": "image", "source": { "type": "url", "url": url } })
}

#[async_trait]
impl ChatClient for AnthropicClient {
    async fn chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> Result<ChatChoice, LlmError> {
        let (system, api_messages) = self.to_api_messages(messages);
        let api_tools: Vec<serde_json::Value> = tools
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "input_schema": t.parameters,
                })
            })
            .collect();

        let mut body = json!({
            "model": self.model,
            "max_tokens": DEFAULT_MAX_TOKENS,
            "messages": api_messages,
        });
        if let Some(system) = system {
            body["system"] = json!(system);
        }
        if !api_tools.is_empty() {
            body["tools"] = json!(api_tools);
        }

        let url = format!("{}/v1/messages", self.base_url);
        let resp = retry_with_backoff("anthropic.chat", || async {
            let result = self
                .http
                .post(&url)
                .header("x-api-key", &self.api_key)
                .header("anthropic-version", API_VERSION)
                .header("content-type", "application/json")
                .json(&body)
                .send()
                .await;

            let resp = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() => return Err((LlmError::Transient(e.to_string()), true)),
                Err(e) => return Err((LlmError::Permanent(e.to_string()), false)),
            };

            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &text));
            }

            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| (LlmError::Permanent(format!("parse error: {e}")), false))
        })
        .await?;

        parse_response(&resp)
    }
}

fn parse_response(resp: &serde_json::Value) -> Result<ChatChoice, LlmError> {
    let content = resp
        .get("content")
        .and_then(|c| c.as_array())
        .ok_or_else(|| LlmError::Permanent("missing content array".to_string()))?;

    let mut tool_calls = Vec::new();
    let mut text = String::new();
    for block in content {
        match block.get("type").and_then(|t| t.as_str()) {
            Some("tool_use") => {
                tool_calls.push(ToolCallOut {
                    id: block.get("id").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    name: block.get("name").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
                    arguments: block.get("input").cloned().unwrap_or(json!({})),
                });
            }
            Some("text") => {
                if let Some(t) = block.get("text").and_then(|v| v.as_str()) {
                    text.push_str(t);
                }
            }
            _ => {}
        }
    }

    debug!(tool_calls = tool_calls.len(), text_len = text.len(), "anthropic response parsed");

    if !tool_calls.is_empty() {
        Ok(ChatChoice::ToolCalls(tool_calls))
    } else {
        Ok(ChatChoice::Text(text))
    }
}

#[async_trait]
impl EmbeddingClient for AnthropicClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>, LlmError> {
        let (Some(url), Some(key)) = (&self.embeddings_url, &self.embeddings_api_key) else {
            return Err(LlmError::Permanent("no embeddings endpoint configured".to_string()));
        };

        let body = json!({ "model": self.embedding_model, "input": text });
        let resp = retry_with_backoff("embed", || async {
            let result = self
                .http
                .post(url)
                .header("authorization", format!("Bearer {key}"))
                .json(&body)
                .send()
                .await;

            let resp = match result {
                Ok(r) => r,
                Err(e) if e.is_timeout() => return Err((LlmError::Transient(e.to_string()), true)),
                Err(e) => return Err((LlmError::Permanent(e.to_string()), false)),
            };

            let status = resp.status().as_u16();
            if !resp.status().is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(classify_status(status, &text));
            }
            resp.json::<serde_json::Value>()
                .await
                .map_err(|e| (LlmError::Permanent(format!("parse error: {e}")), false))
        })
        .await?;

        let vector = resp
            .get("data")
            .and_then(|d| d.as_array())
            .and_then(|a| a.first())
            .and_then(|e| e.get("embedding"))
            .and_then(|v| v.as_array())
            .ok_or_else(|| LlmError::Permanent("missing embedding vector".to_string()))?;

        Ok(vector.iter().filter_map(|v| v.as_f64()).map(|v| v as f32).collect())
    }
}
