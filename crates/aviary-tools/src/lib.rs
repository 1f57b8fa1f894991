pub mod gateway;
pub mod memory_tools;
pub mod react;
pub mod registry;
pub mod reply;
pub mod web_fetch;
pub mod web_search;

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;

pub use gateway::GatewayPort;
pub use registry::{Tool, ToolOutcome, ToolRegistry};
pub use web_search::SearchDelivery;

use aviary_llm::{ChatClient, EmbeddingClient};
use aviary_memory::MemoryStore;
use memory_tools::{MemoryForgetTool, MemoryRecallTool, MemorySaveTool};
use react::ReactTool;
use reply::ReplyTool;
use web_fetch::WebFetchTool;
use web_search::WebSearchTool;

/// Per-turn wiring needed to build the full registry of seven
/// tools. One of these is assembled fresh per turn by the conversation
/// worker, scoped to that turn's channel and tenant.
pub struct ToolRegistryConfig {
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub chat: Arc<dyn ChatClient>,
    pub gateway: Arc<dyn GatewayPort>,
    pub server_id: String,
    pub default_user_id: Option<String>,
    pub channel_id: Option<String>,
    pub dedup_threshold: f32,
    pub recall_limit: usize,
    pub web_timeout: Duration,
    pub search_running: Arc<AtomicBool>,
    pub search_delivery: mpsc::Sender<SearchDelivery>,
}

/// The full tool set offered during a normal turn.
pub fn build_full_registry(cfg: ToolRegistryConfig) -> ToolRegistry {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(MemorySaveTool {
            store: Arc::clone(&cfg.store),
            embeddings: Arc::clone(&cfg.embeddings),
            server_id: cfg.server_id.clone(),
            default_user_id: cfg.default_user_id.clone(),
            channel_id: cfg.channel_id.clone(),
            dedup_threshold: cfg.dedup_threshold,
        }),
        Arc::new(MemoryRecallTool {
            store: Arc::clone(&cfg.store),
            embeddings: Arc::clone(&cfg.embeddings),
            server_id: cfg.server_id.clone(),
            default_top_n: cfg.recall_limit,
        }),
        Arc::new(MemoryForgetTool {
            store: Arc::clone(&cfg.store),
            server_id: cfg.server_id.clone(),
        }),
        Arc::new(ReplyTool { gateway: Arc::clone(&cfg.gateway) }),
        Arc::new(ReactTool { gateway: Arc::clone(&cfg.gateway) }),
        Arc::new(WebSearchTool {
            chat: Arc::clone(&cfg.chat),
            timeout: cfg.web_timeout,
            running: Arc::clone(&cfg.search_running),
            delivery: cfg.search_delivery.clone(),
        }),
        Arc::new(WebFetchTool { http: reqwest::Client::new() }),
    ];
    ToolRegistry::new(tools)
}

/// Memory-only registry for background extraction: no
/// `reply` capability, so extraction can never speak in the channel.
pub fn build_memory_only_registry(
    store: Arc<MemoryStore>,
    embeddings: Arc<dyn EmbeddingClient>,
    server_id: String,
    dedup_threshold: f32,
    recall_limit: usize,
) -> ToolRegistry {
    let tools: Vec<Arc<dyn Tool>> = vec![
        Arc::new(MemorySaveTool {
            store: Arc::clone(&store),
            embeddings: Arc::clone(&embeddings),
            server_id: server_id.clone(),
            default_user_id: None,
            channel_id: None,
            dedup_threshold,
        }),
        Arc::new(MemoryRecallTool {
            store: Arc::clone(&store),
            embeddings,
            server_id: server_id.clone(),
            default_top_n: recall_limit,
        }),
        Arc::new(MemoryForgetTool { store, server_id }),
    ];
    ToolRegistry::new(tools)
}
