//! `memory_save` / `memory_recall` / `memory_forget`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use aviary_llm::EmbeddingClient;
use aviary_memory::{MemoryError, MemoryStore};

use crate::registry::{Tool, ToolOutcome};

/// Best-effort embed: `None` on failure, matching the Memory Engine's
/// graceful degradation.
async fn try_embed(client: &dyn EmbeddingClient, text: &str) -> Option<Vec<f32>> {
    match client.embed(text).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "embedding unavailable, proceeding without one");
            None
        }
    }
}

pub struct MemorySaveTool {
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub server_id: String,
    pub default_user_id: Option<String>,
    pub channel_id: Option<String>,
    pub dedup_threshold: f32,
}

#[async_trait]
impl Tool for MemorySaveTool {
    fn name(&self) -> &str {
        "memory_save"
    }

    fn description(&self) -> &str {
        "Save a fact for later recall. Use this when the user shares something worth remembering."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "content": { "type": "string", "description": "The fact to remember." },
                "user_id": { "type": "string", "description": "Subject of the fact, if it's about a specific person." },
                "importance": { "type": "number", "description": "0.0-1.0, how important this fact is.", "minimum": 0.0, "maximum": 1.0 },
            },
            "required": ["content"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutcome::err("missing required argument: content");
        };
        let user_id = args
            .get("user_id")
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .or_else(|| self.default_user_id.clone());
        let importance = args.get("importance").and_then(|v| v.as_f64()).unwrap_or(0.5) as f32;

        let embedding = try_embed(self.embeddings.as_ref(), content).await;
        let result = self.store.save(
            content,
            &self.server_id,
            user_id.as_deref(),
            self.channel_id.as_deref(),
            importance,
            self.dedup_threshold,
            embedding.as_deref(),
        );

        match result {
            Ok(outcome) => ToolOutcome::ok(format!("{} (id: {})", outcome.status, outcome.id)),
            Err(e) => ToolOutcome::err(format!("memory save failed: {e}")),
        }
    }
}

pub struct MemoryRecallTool {
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub server_id: String,
    pub default_top_n: usize,
}

#[async_trait]
impl Tool for MemoryRecallTool {
    fn name(&self) -> &str {
        "memory_recall"
    }

    fn description(&self) -> &str {
        "Search remembered facts by meaning and keyword. An explicit recall always bypasses the similarity floor."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "top_n": { "type": "integer", "minimum": 1 },
            },
            "required": ["query"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(query) = args.get("query").and_then(|v| v.as_str()) else {
            return ToolOutcome::err("missing required argument: query");
        };
        let top_n = args
            .get("top_n")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(self.default_top_n);

        // Tool-invoked recall always uses sim_threshold=0 — an explicit
        // recall should not be silently filtered.
        let embedding = try_embed(self.embeddings.as_ref(), query).await;
        match self.store.recall(query, &self.server_id, top_n, 0.0, embedding.as_deref()) {
            Ok(rows) if rows.is_empty() => ToolOutcome::ok("No matching memories found."),
            Ok(rows) => {
                let listing = rows
                    .iter()
                    .map(|m| format!("- [{}] (importance: {:.1}) {}", m.id, m.importance, m.content))
                    .collect::<Vec<_>>()
                    .join("\n");
                ToolOutcome::ok(listing)
            }
            Err(e) => ToolOutcome::err(format!("memory recall failed: {e}")),
        }
    }
}

pub struct MemoryForgetTool {
    pub store: Arc<MemoryStore>,
    pub server_id: String,
}

#[async_trait]
impl Tool for MemoryForgetTool {
    fn name(&self) -> &str {
        "memory_forget"
    }

    fn description(&self) -> &str {
        "Soft-delete a remembered fact by id so it no longer surfaces in recall."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "memory_id": { "type": "string" } },
            "required": ["memory_id"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(id) = args.get("memory_id").and_then(|v| v.as_str()) else {
            return ToolOutcome::err("missing required argument: memory_id");
        };
        match self.store.forget(&self.server_id, id) {
            Ok(()) => ToolOutcome::ok("Forgotten."),
            Err(MemoryError::NotFound(_)) => ToolOutcome::ok("Memory not found."),
            Err(e) => ToolOutcome::err(format!("memory forget failed: {e}")),
        }
    }
}
