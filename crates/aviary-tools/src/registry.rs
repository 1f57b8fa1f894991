//! The Tool Registry: a `Tool` trait plus name-indexed dispatch over a
//! fixed tool set, exposing `replied`/`reply_text` observables so the
//! conversation loop can tell a tool-driven reply from naked assistant
//! prose.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;

/// Result of executing a tool: text handed back to the model as the tool
/// result, or an error message (also handed back as text — a failed tool
/// call never aborts the loop, it just gives the model an error to react to).
#[derive(Debug, Clone)]
pub struct ToolOutcome {
    pub content: String,
    pub is_error: bool,
}

impl ToolOutcome {
    pub fn ok(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: false }
    }

    pub fn err(content: impl Into<String>) -> Self {
        Self { content: content.into(), is_error: true }
    }
}

/// A callable tool offered to the LLM: name, natural-language description,
/// a JSON-Schema parameter document, and `call`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters_schema(&self) -> serde_json::Value;
    async fn call(&self, args_json: serde_json::Value) -> ToolOutcome;
}

/// Name-indexed dispatch plus the two mutable observables the conversation
/// loop needs to tell a tool-driven reply from naked assistant prose.
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    replied: AtomicBool,
    reply_text: Mutex<Option<String>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        Self {
            tools,
            replied: AtomicBool::new(false),
            reply_text: Mutex::new(None),
        }
    }

    pub fn definitions(&self) -> Vec<aviary_llm::ToolDefinition> {
        self.tools
            .iter()
            .map(|t| aviary_llm::ToolDefinition {
                name: t.name().to_string(),
                description: t.description().to_string(),
                parameters: t.parameters_schema(),
            })
            .collect()
    }

    pub async fn dispatch(&self, name: &str, args: serde_json::Value) -> ToolOutcome {
        let outcome = match self.tools.iter().find(|t| t.name() == name) {
            Some(tool) => tool.call(args.clone()).await,
            None => return ToolOutcome::err(format!("unknown tool: {name}")),
        };
        // The registry observes the well-known `reply` tool's own calls
        // rather than the tool holding a back-reference to its registry —
        // avoids a reference cycle between `Arc<ToolRegistry>` and the
        // `Arc<dyn Tool>` it owns.
        if name == "reply" && !outcome.is_error {
            if let Some(content) = args.get("content").and_then(|v| v.as_str()) {
                self.record_reply(content);
            }
        }
        outcome
    }

    /// Called by the `reply` tool when it sends content.
    pub fn record_reply(&self, content: &str) {
        self.replied.store(true, Ordering::SeqCst);
        *self.reply_text.lock().unwrap() = Some(content.to_string());
    }

    pub fn replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    pub fn reply_text(&self) -> Option<String> {
        self.reply_text.lock().unwrap().clone()
    }
}
