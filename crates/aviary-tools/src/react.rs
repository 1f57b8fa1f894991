//! The `react` tool: side-effect only, records nothing.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use crate::gateway::GatewayPort;
use crate::registry::{Tool, ToolOutcome};

pub struct ReactTool {
    pub gateway: Arc<dyn GatewayPort>,
}

#[async_trait]
impl Tool for ReactTool {
    fn name(&self) -> &str {
        "react"
    }

    fn description(&self) -> &str {
        "Add an emoji reaction to the triggering message."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "emoji": { "type": "string" } },
            "required": ["emoji"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(emoji) = args.get("emoji").and_then(|v| v.as_str()) else {
            return ToolOutcome::err("missing required argument: emoji");
        };
        match self.gateway.add_reaction(emoji).await {
            Ok(()) => ToolOutcome::ok("reacted"),
            Err(e) => ToolOutcome::err(format!("react failed: {e}")),
        }
    }
}
