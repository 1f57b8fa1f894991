//! The `web_search` tool: asynchronous, test-and-set gated, delivers
//! results later through the worker's internal ingestion channel
//! (the results themselves are delivered later, asynchronously).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::warn;

use aviary_llm::{ChatClient, ChatMessage, ChatRole, MessageContent, ToolDefinition};

use crate::registry::{Tool, ToolOutcome};

/// A result delivered asynchronously into a worker's internal channel.
#[derive(Debug, Clone)]
pub struct SearchDelivery {
    pub query: String,
    pub result: String,
}

/// The provider-specific "search" tool-spec injected into the request so
/// the model performs an actual web search rather than answering from
/// training data. The concrete provider is responsible for recognizing
/// this well-known name; the core only needs to name it consistently.
fn search_tool_spec() -> ToolDefinition {
    ToolDefinition {
        name: "web_search".to_string(),
        description: "Search the web and return relevant results.".to_string(),
        parameters: json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        }),
    }
}

pub struct WebSearchTool {
    pub chat: Arc<dyn ChatClient>,
    pub timeout: Duration,
    pub running: Arc<AtomicBool>,
    pub delivery: mpsc::Sender<SearchDelivery>,
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> &str {
        "web_search"
    }

    fn description(&self) -> &str {
        "Search the web. Results arrive asynchronously as a follow-up system message; this call only acknowledges the request."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "query": { "type": "string" } },
            "required": ["query"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(query) = args.get("query").and_then(|v| v.as_str()).map(str::to_string) else {
            return ToolOutcome::err("missing required argument: query");
        };

        if self.running.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_err() {
            return ToolOutcome::ok("already running");
        }

        let chat = Arc::clone(&self.chat);
        let running = Arc::clone(&self.running);
        let delivery = self.delivery.clone();
        let timeout = self.timeout;
        let query_for_task = query.clone();

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(timeout, run_search(chat.as_ref(), &query_for_task)).await;
            let result = match outcome {
                Ok(Ok(text)) => text,
                Ok(Err(e)) => format!("search failed: {e}"),
                Err(_) => "search timed out".to_string(),
            };
            running.store(false, Ordering::SeqCst);
            if delivery.send(SearchDelivery { query: query_for_task, result }).await.is_err() {
                warn!("web_search: worker's internal channel is gone, dropping results");
            }
        });

        ToolOutcome::ok(format!("Searching for \"{query}\" — results will follow."))
    }
}

async fn run_search(chat: &dyn ChatClient, query: &str) -> Result<String, aviary_llm::LlmError> {
    let messages = vec![ChatMessage {
        role: ChatRole::User,
        content: MessageContent::text(format!("Search the web for: {query}")),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }];
    let choice = chat.chat(&messages, &[search_tool_spec()]).await?;
    Ok(choice.text().unwrap_or_default().to_string())
}
