//! §4.4 Router: the channel→worker map, tenant-resources map, spam gate,
//! hot-load, and graceful drain.
//!
//! A registry of per-channel conversation workers keyed by channel id, with
//! the same retry-with-backoff bookkeeping shape a platform-reconnect
//! registry would use — here mailbox-respawn stands in for
//! adapter-reconnect: a dead or full mailbox gets evicted and a fresh
//! worker takes its place.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aviary_conversation::{spawn, ChannelAgentHandle, GatewayAdapter, WorkerConfig};
use aviary_core::config::{ConfigHandle, DEFAULT_VIDEO_CAP_BYTES, DRAIN_DEADLINE_SECS};
use aviary_core::types::InboundMessage;
use aviary_llm::{ChatClient, EmbeddingClient};
use aviary_memory::MemoryStore;

use crate::spam::{SpamCheck, SpamRecord};
use crate::tenant::TenantResources;
use crate::wait_group::WaitGroup;

/// A function that loads a tenant's personality text from its configured
/// path. Injected rather than hard-wired — file I/O is the operator's
/// concern; the router only needs the result.
pub type PersonalityLoader = dyn Fn(&str) -> std::io::Result<String> + Send + Sync;

/// Everything the router needs to hot-load a tenant it doesn't yet hold
/// resident: the default (config-less-credential) gateway session, the LLM
/// client pair, where tenant stores live on disk, and how to read a
/// personality file.
pub struct RouterDeps {
    pub config: Arc<ConfigHandle>,
    pub default_adapter: Arc<dyn GatewayAdapter>,
    pub default_store: Arc<MemoryStore>,
    pub default_personality: String,
    pub chat: Arc<dyn ChatClient>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub data_dir: PathBuf,
    pub load_personality: Arc<PersonalityLoader>,
}

/// The channel→worker map, tenant-resources map, spam gate, and the
/// wait-group tracking live workers, all rooted at one cancellation token.
pub struct Router {
    deps: RouterDeps,
    channels: Mutex<HashMap<u64, ChannelAgentHandle>>,
    tenants: Mutex<HashMap<String, Arc<TenantResources>>>,
    spam: Mutex<HashMap<(String, String), SpamRecord>>,
    wait_group: Arc<WaitGroup>,
    shutdown: CancellationToken,
}

impl Router {
    pub fn new(deps: RouterDeps) -> Arc<Self> {
        Arc::new(Self {
            deps,
            channels: Mutex::new(HashMap::new()),
            tenants: Mutex::new(HashMap::new()),
            spam: Mutex::new(HashMap::new()),
            wait_group: Arc::new(WaitGroup::new()),
            shutdown: CancellationToken::new(),
        })
    }

    /// The root cancellation token. Cancel it, then call [`Router::wait_for_drain`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Install a tenant that cannot be hot-loaded mid-flight (a custom
    /// gateway credential means a fresh gateway session had to be opened at
    /// startup). Called once per such tenant before the gateway starts
    /// accepting traffic.
    pub fn preload_tenant(&self, server_id: String, resources: Arc<TenantResources>) {
        self.tenants.lock().unwrap().insert(server_id, resources);
    }

    /// Remove a tenant from the resident map. Subsequent messages for it
    /// silently drop until it is re-added (by preload or hot-load).
    pub fn unload_agent(&self, server_id: &str) {
        self.tenants.lock().unwrap().remove(server_id);
        info!(server_id, "tenant unloaded");
    }

    /// Route one inbound message: resolve the tenant, apply the ignore
    /// list and spam gate, then locate-or-spawn the channel's worker.
    pub async fn route(self: &Arc<Self>, msg: InboundMessage) {
        let server_id = msg.server_id.as_str().to_string();

        let tenant = match self.resolve_tenant(&server_id).await {
            Some(t) => t,
            None => return, // unconfigured tenant: drop silently
        };

        if tenant.is_ignored(&msg.author_id) {
            return;
        }

        match self.check_spam(&server_id, &msg.author_id) {
            SpamCheck::StillBlocked => return,
            SpamCheck::JustBlocked => {
                let notice = format!(
                    "<@{}> — you're sending messages too fast. Cooling down for {} minutes.",
                    msg.author_id,
                    aviary_core::config::SPAM_COOLDOWN_MINUTES
                );
                if let Err(e) = tenant.adapter.send_message(&msg.channel_id, &notice).await {
                    warn!(error = %e, "failed to send spam cooldown notice");
                }
                return;
            }
            SpamCheck::Allowed => {}
        }

        self.locate_or_spawn(tenant, msg).await;
    }

    /// Lookup, or — on miss — attempt a hot-load, inserting the result so
    /// concurrent routes for the same tenant converge on one resident copy.
    async fn resolve_tenant(&self, server_id: &str) -> Option<Arc<TenantResources>> {
        if let Some(t) = self.tenants.lock().unwrap().get(server_id) {
            return Some(Arc::clone(t));
        }

        let loaded = self.hot_load(server_id).await?;
        let mut tenants = self.tenants.lock().unwrap();
        Some(Arc::clone(
            tenants.entry(server_id.to_string()).or_insert(loaded),
        ))
    }

    /// Install a newly configured tenant without a restart.
    ///
    /// `DM:<user_id>` tenants synthesize resources from the default
    /// session/store. Guild tenants are hot-loaded only when their config
    /// entry carries no custom gateway credential — a custom credential
    /// would require opening a new gateway session mid-flight, which isn't
    /// possible here, so those are skipped with a warning (they must have
    /// been preloaded at startup instead).
    async fn hot_load(&self, server_id: &str) -> Option<Arc<TenantResources>> {
        if server_id.starts_with("DM:") {
            return Some(Arc::new(TenantResources {
                server_id: server_id.to_string(),
                store: Arc::clone(&self.deps.default_store),
                chat: Arc::clone(&self.deps.chat),
                embeddings: Arc::clone(&self.deps.embeddings),
                adapter: Arc::clone(&self.deps.default_adapter),
                personality: self.deps.default_personality.clone(),
                language: None,
                ignore_list: Vec::new(),
                default_response_mode: self.deps.config.load().response.default_mode,
                channel_overrides: Vec::new(),
            }));
        }

        let config = self.deps.config.load();
        let entry = config.find_tenant(server_id)?;

        if entry.has_custom_credential() {
            warn!(server_id, "tenant has a custom gateway credential and cannot be hot-loaded; restart required");
            return None;
        }

        let store = match self.open_store(&entry.agent_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(server_id, error = %e, "failed to open tenant store during hot-load");
                return None;
            }
        };

        let personality = match (self.deps.load_personality)(&entry.personality_path) {
            Ok(text) => text,
            Err(e) => {
                warn!(server_id, error = %e, "failed to load personality text, using empty personality");
                String::new()
            }
        };

        info!(server_id, agent_id = %entry.agent_id, "tenant hot-loaded");

        Some(Arc::new(TenantResources {
            server_id: server_id.to_string(),
            store,
            chat: Arc::clone(&self.deps.chat),
            embeddings: Arc::clone(&self.deps.embeddings),
            adapter: Arc::clone(&self.deps.default_adapter),
            personality,
            language: entry.language.clone(),
            ignore_list: entry.ignore_list.clone(),
            default_response_mode: entry.response_mode.unwrap_or(config.response.default_mode),
            channel_overrides: entry.channels.clone(),
        }))
    }

    fn open_store(&self, agent_id: &str) -> aviary_core::Result<Arc<MemoryStore>> {
        std::fs::create_dir_all(&self.deps.data_dir)?;
        let path = self.deps.data_dir.join(format!("{agent_id}.sqlite3"));
        let conn = rusqlite::Connection::open(&path)
            .map_err(|e| aviary_core::AviaryError::Database(e.to_string()))?;
        let store = MemoryStore::new(conn).map_err(|e| aviary_core::AviaryError::Database(e.to_string()))?;
        Ok(Arc::new(store))
    }

    fn check_spam(&self, server_id: &str, user_id: &str) -> SpamCheck {
        let mut spam = self.spam.lock().unwrap();
        let key = (server_id.to_string(), user_id.to_string());
        spam.entry(key).or_default().check(Instant::now())
    }

    /// If a worker already holds this channel, try a non-blocking send;
    /// on success we're done. On a full mailbox or a dead task, evict and
    /// fall through to spawning a fresh worker. If no worker exists yet,
    /// spawn one and guarantee delivery of the triggering message into its
    /// brand-new, empty mailbox.
    async fn locate_or_spawn(self: &Arc<Self>, tenant: Arc<TenantResources>, msg: InboundMessage) {
        let channel_key = msg.channel_id.0;

        let existing = self
            .channels
            .lock()
            .unwrap()
            .get(&channel_key)
            .map(|h| h.mailbox.clone());

        if let Some(mailbox) = existing {
            match mailbox.try_send(msg.clone()) {
                Ok(()) => return,
                Err(_) => {
                    warn!(channel_id = channel_key, "worker mailbox full or dead, evicting and respawning");
                    self.channels.lock().unwrap().remove(&channel_key);
                }
            }
        }

        self.spawn_worker(tenant, msg).await;
    }

    async fn spawn_worker(self: &Arc<Self>, tenant: Arc<TenantResources>, msg: InboundMessage) {
        let channel_key = msg.channel_id.0;
        let config = self.deps.config.load();
        let response_mode = tenant.response_mode_for(channel_key);

        let worker_config = WorkerConfig {
            store: Arc::clone(&tenant.store),
            embeddings: Arc::clone(&tenant.embeddings),
            chat: Arc::clone(&tenant.chat),
            adapter: Arc::clone(&tenant.adapter),
            server_id: tenant.server_id.clone(),
            channel_id: msg.channel_id.clone(),
            personality: tenant.personality.clone(),
            language: tenant.language.clone(),
            response_mode,
            runtime: config.runtime.clone(),
            memory: config.memory.clone(),
            web_timeout: Duration::from_secs(config.tools.web_timeout_seconds),
            video_cap_bytes: DEFAULT_VIDEO_CAP_BYTES,
        };

        let token = self.shutdown.child_token();
        let handle = spawn(worker_config, token);

        // The mailbox is brand new and empty: this send is guaranteed to succeed.
        if handle.mailbox.try_send(msg).is_err() {
            warn!(channel_id = channel_key, "delivery into freshly spawned worker's mailbox failed unexpectedly");
        }

        self.wait_group.add(1);
        let join = handle.task;
        let sender_for_map = handle.mailbox.clone();
        self.channels.lock().unwrap().insert(
            channel_key,
            ChannelAgentHandle { mailbox: sender_for_map.clone(), task: join },
        );

        let router = Arc::clone(self);
        let cleanup_mailbox = sender_for_map;
        tokio::spawn(async move {
            // Re-borrow the join handle through the map entry isn't
            // possible (JoinHandle was moved into it), so this task only
            // exists to detect the worker's exit and clean up afterward;
            // it does so by polling the channel entry's mailbox for
            // closure, which happens when the worker task drops its
            // receiver on exit.
            cleanup_mailbox.closed().await;
            let mut channels = router.channels.lock().unwrap();
            if let Some(handle) = channels.get(&channel_key) {
                if handle.mailbox.same_channel(&cleanup_mailbox) {
                    channels.remove(&channel_key);
                }
            }
            drop(channels);
            router.wait_group.done();
        });
    }

    /// Cancel the root context first, then call this: waits up to 30s for
    /// every worker to drain its buffered mailbox and exit.
    pub async fn wait_for_drain(&self) {
        let ok = self
            .wait_group
            .wait(Duration::from_secs(DRAIN_DEADLINE_SECS))
            .await;
        if !ok {
            warn!("drain exceeded {}s deadline, some workers may still be running", DRAIN_DEADLINE_SECS);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn spam_record_default_allows_first_message() {
        let mut record = SpamRecord::default();
        assert!(matches!(record.check(Instant::now()), SpamCheck::Allowed));
    }
}
