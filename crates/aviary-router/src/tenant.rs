//! Resident tenant resources: everything a channel worker under one
//! `server_id` shares with its siblings.

use std::sync::Arc;

use aviary_conversation::GatewayAdapter;
use aviary_core::types::ResponseMode;
use aviary_llm::{ChatClient, EmbeddingClient};
use aviary_memory::MemoryStore;

/// One resident tenant: its own store, its own personality text, and the
/// response-mode/ignore-list knobs the router consults on every `Route`.
pub struct TenantResources {
    pub server_id: String,
    pub store: Arc<MemoryStore>,
    pub chat: Arc<dyn ChatClient>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    /// The gateway session this tenant sends/receives through. A tenant
    /// hot-loaded without a custom credential shares the default session;
    /// a tenant with a custom credential gets its own at startup.
    pub adapter: Arc<dyn GatewayAdapter>,
    pub personality: String,
    pub language: Option<String>,
    pub ignore_list: Vec<String>,
    pub default_response_mode: ResponseMode,
    pub channel_overrides: Vec<aviary_core::config::ChannelOverride>,
}

impl TenantResources {
    /// Channel override wins, falling back to the tenant's already-resolved default.
    pub fn response_mode_for(&self, channel_id: u64) -> ResponseMode {
        if let Some(mode) = self
            .channel_overrides
            .iter()
            .find(|c| c.channel_id == channel_id)
            .and_then(|c| c.response_mode)
        {
            return mode;
        }
        self.default_response_mode
    }

    pub fn is_ignored(&self, author_id: &str) -> bool {
        self.ignore_list.iter().any(|id| id == author_id)
    }
}
