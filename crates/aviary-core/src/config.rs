use arc_swap::ArcSwap;
use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::{AviaryError, Result};

pub const SPAM_WINDOW_SECS: u64 = 30;
pub const SPAM_THRESHOLD: u32 = 10;
pub const SPAM_COOLDOWN_MINUTES: u64 = 60;
pub const DRAIN_DEADLINE_SECS: u64 = 30;
pub const WORKER_MAILBOX_CAPACITY: usize = 100;
pub const WEB_SEARCH_CHANNEL_CAPACITY: usize = 50;
pub const MEMORY_EXTRACTION_TIMEOUT_SECS: u64 = 60;
pub const MESSAGE_LIMIT_UTF16_UNITS: usize = 2000;
pub const CONVERSATION_LOG_CAP: i64 = 10_000;
pub const CONVERSATION_PRUNE_CHANCE_DENOM: u32 = 500;
pub const TYPING_REFRESH_SECS: u64 = 8;
pub const DEFAULT_VIDEO_CAP_BYTES: u64 = 50 * 1024 * 1024;

/// Top-level runtime configuration (aviary.toml + AVIARY_* env overrides).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AviaryConfig {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub response: ResponseConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    pub discord: DiscordConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub tenants: Vec<TenantConfig>,
    #[serde(default)]
    pub database: DatabaseConfig,
}

impl Default for AviaryConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            response: ResponseConfig::default(),
            memory: MemoryConfig::default(),
            tools: ToolsConfig::default(),
            discord: DiscordConfig {
                bot_token: String::new(),
                display_name: "Aviary".to_string(),
            },
            llm: LlmConfig::default(),
            tenants: Vec::new(),
            database: DatabaseConfig::default(),
        }
    }
}

/// The single concrete LLM client's credentials (§6 LLM client contract).
/// Multi-provider routing is explicitly out of scope; this is the one
/// provider the core talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default = "default_chat_model")]
    pub model: String,
    /// An OpenAI-compatible embeddings endpoint. Left unset, the client
    /// still chats fine; `Embed` calls fail closed and Memory Engine saves
    /// degrade gracefully (no embedding row, keyword-only findable).
    pub embeddings_url: Option<String>,
    pub embeddings_api_key: Option<String>,
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            model: default_chat_model(),
            embeddings_url: None,
            embeddings_api_key: None,
            embedding_model: default_embedding_model(),
        }
    }
}

fn default_chat_model() -> String {
    "claude-3-5-sonnet-latest".to_string()
}

fn default_embedding_model() -> String {
    "text-embedding-3-small".to_string()
}

/// Per-channel worker lifecycle and coalescing knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_idle_timeout_minutes")]
    pub idle_timeout_minutes: u64,
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    #[serde(default = "default_history_backfill_limit")]
    pub history_backfill_limit: usize,
    /// Turns between background extraction passes. -1 disables.
    #[serde(default = "default_memory_extraction_interval")]
    pub memory_extraction_interval: i64,
    #[serde(default)]
    pub coalesce_disabled: bool,
    #[serde(default = "default_coalesce_debounce_ms")]
    pub coalesce_debounce_ms: u64,
    #[serde(default = "default_coalesce_max_wait_ms")]
    pub coalesce_max_wait_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
            idle_timeout_minutes: default_idle_timeout_minutes(),
            max_tool_iterations: default_max_tool_iterations(),
            history_backfill_limit: default_history_backfill_limit(),
            memory_extraction_interval: default_memory_extraction_interval(),
            coalesce_disabled: false,
            coalesce_debounce_ms: default_coalesce_debounce_ms(),
            coalesce_max_wait_ms: default_coalesce_max_wait_ms(),
        }
    }
}

fn default_history_limit() -> usize {
    20
}
fn default_idle_timeout_minutes() -> u64 {
    10
}
fn default_max_tool_iterations() -> u32 {
    10
}
fn default_history_backfill_limit() -> usize {
    0
}
fn default_memory_extraction_interval() -> i64 {
    -1
}
fn default_coalesce_debounce_ms() -> u64 {
    1500
}
fn default_coalesce_max_wait_ms() -> u64 {
    4000
}

/// Response-mode resolution: global default, optionally overridden per tenant/channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseConfig {
    #[serde(default)]
    pub default_mode: crate::types::ResponseMode,
}

impl Default for ResponseConfig {
    fn default() -> Self {
        Self {
            default_mode: crate::types::ResponseMode::Smart,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_recall_limit")]
    pub recall_limit: usize,
    #[serde(default = "default_dedup_threshold")]
    pub dedup_threshold: f32,
    #[serde(default = "default_recall_threshold")]
    pub recall_threshold: f32,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            recall_limit: default_recall_limit(),
            dedup_threshold: default_dedup_threshold(),
            recall_threshold: default_recall_threshold(),
        }
    }
}

fn default_recall_limit() -> usize {
    15
}
fn default_dedup_threshold() -> f32 {
    0.85
}
fn default_recall_threshold() -> f32 {
    0.35
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_web_timeout_seconds")]
    pub web_timeout_seconds: u64,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            web_timeout_seconds: default_web_timeout_seconds(),
        }
    }
}

fn default_web_timeout_seconds() -> u64 {
    15
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.aviary/tenants")
}

/// Discord gateway credentials and default-session behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscordConfig {
    pub bot_token: String,
    #[serde(default = "default_display_name")]
    pub display_name: String,
}

fn default_display_name() -> String {
    "Aviary".to_string()
}

/// One operator-configured tenant entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    pub agent_id: String,
    pub server_id: String,
    pub personality_path: String,
    /// A tenant with a custom credential cannot be hot-loaded mid-flight.
    #[serde(default)]
    pub gateway_token: Option<String>,
    #[serde(default)]
    pub ignore_list: Vec<String>,
    pub response_mode: Option<crate::types::ResponseMode>,
    #[serde(default)]
    pub channels: Vec<ChannelOverride>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelOverride {
    pub channel_id: u64,
    pub response_mode: Option<crate::types::ResponseMode>,
}

impl TenantConfig {
    /// Resolve the effective response mode for a channel: channel override →
    /// tenant default → global default.
    pub fn resolve_response_mode(
        &self,
        channel_id: u64,
        global_default: crate::types::ResponseMode,
    ) -> crate::types::ResponseMode {
        if let Some(ch) = self.channels.iter().find(|c| c.channel_id == channel_id) {
            if let Some(mode) = ch.response_mode {
                return mode;
            }
        }
        self.response_mode.unwrap_or(global_default)
    }

    pub fn has_custom_credential(&self) -> bool {
        self.gateway_token.is_some()
    }
}

impl AviaryConfig {
    /// Load config from a TOML file with AVIARY_* env var overrides.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(default_config_path);

        let config: AviaryConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::prefixed("AVIARY_").split("_"))
            .extract()
            .map_err(|e| AviaryError::Config(e.to_string()))?;

        Ok(config)
    }

    pub fn find_tenant(&self, server_id: &str) -> Option<&TenantConfig> {
        self.tenants.iter().find(|t| t.server_id == server_id)
    }
}

fn default_config_path() -> String {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    format!("{home}/.aviary/aviary.toml")
}

/// Atomic publication point for a config snapshot. Readers capture a
/// consistent `Arc<AviaryConfig>` per request without ever blocking a
/// concurrent writer; writers validate a candidate (parse-then-load) before
/// swapping the pointer.
pub struct ConfigHandle {
    inner: ArcSwap<AviaryConfig>,
}

impl ConfigHandle {
    pub fn new(config: AviaryConfig) -> Self {
        Self {
            inner: ArcSwap::from_pointee(config),
        }
    }

    pub fn load(&self) -> Arc<AviaryConfig> {
        self.inner.load_full()
    }

    /// Validate `path` by loading it before publishing; the live snapshot is
    /// left untouched on failure.
    pub fn reload_from(&self, path: &str) -> Result<()> {
        let candidate = AviaryConfig::load(Some(path))?;
        self.inner.store(Arc::new(candidate));
        Ok(())
    }
}
