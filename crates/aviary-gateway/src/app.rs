//! Process wiring: build the shared clients and stores, construct the
//! router, preload any tenant that carries its own gateway credential, then
//! run every gateway session until a shutdown signal arrives.

use std::path::PathBuf;
use std::sync::Arc;

use tracing::{info, warn};

use aviary_core::config::AviaryConfig;
use aviary_discord::DiscordAdapter;
use aviary_llm::{AnthropicClient, ChatClient, EmbeddingClient};
use aviary_memory::MemoryStore;
use aviary_router::{PersonalityLoader, Router, RouterDeps, TenantResources};

pub async fn run(config: AviaryConfig) -> anyhow::Result<()> {
    let data_dir = PathBuf::from(&config.database.data_dir);
    std::fs::create_dir_all(&data_dir)?;

    let mut client = AnthropicClient::new(config.llm.api_key.clone(), config.llm.model.clone());
    if let (Some(url), Some(key)) = (&config.llm.embeddings_url, &config.llm.embeddings_api_key) {
        client = client.with_embeddings(url.clone(), key.clone(), config.llm.embedding_model.clone());
    }
    let client = Arc::new(client);
    let chat: Arc<dyn ChatClient> = client.clone();
    let embeddings: Arc<dyn EmbeddingClient> = client;

    let default_store = open_store(&data_dir, "default")?;
    let default_adapter = DiscordAdapter::new(config.discord.bot_token.clone(), config.discord.display_name.clone());

    let load_personality: Arc<PersonalityLoader> = Arc::new(|path: &str| std::fs::read_to_string(path));

    let config_handle = Arc::new(aviary_core::config::ConfigHandle::new(config.clone()));

    let router = Router::new(RouterDeps {
        config: Arc::clone(&config_handle),
        default_adapter: default_adapter.clone(),
        default_store,
        default_personality: String::new(),
        chat,
        embeddings,
        data_dir: data_dir.clone(),
        load_personality: Arc::clone(&load_personality),
    });

    let mut adapter_tasks = Vec::new();
    adapter_tasks.push(tokio::spawn(default_adapter.clone().run(Arc::clone(&router))));

    for tenant in &config.tenants {
        let Some(token) = &tenant.gateway_token else {
            continue;
        };

        let store = match open_store(&data_dir, &tenant.agent_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(server_id = %tenant.server_id, error = %e, "failed to open preloaded tenant store, skipping");
                continue;
            }
        };
        let personality = std::fs::read_to_string(&tenant.personality_path).unwrap_or_else(|e| {
            warn!(server_id = %tenant.server_id, error = %e, "failed to load personality text, using empty personality");
            String::new()
        });

        let adapter = DiscordAdapter::new(token.clone(), config.discord.display_name.clone());
        adapter_tasks.push(tokio::spawn(adapter.clone().run(Arc::clone(&router))));

        let client = Arc::new(AnthropicClient::new(config.llm.api_key.clone(), config.llm.model.clone()));
        let chat: Arc<dyn ChatClient> = client.clone();
        let embeddings: Arc<dyn EmbeddingClient> = client;

        router.preload_tenant(
            tenant.server_id.clone(),
            Arc::new(TenantResources {
                server_id: tenant.server_id.clone(),
                store,
                chat,
                embeddings,
                adapter,
                personality,
                language: tenant.language.clone(),
                ignore_list: tenant.ignore_list.clone(),
                default_response_mode: tenant.response_mode.unwrap_or(config.response.default_mode),
                channel_overrides: tenant.channels.clone(),
            }),
        );
        info!(server_id = %tenant.server_id, "tenant preloaded with its own gateway session");
    }

    shutdown_signal().await;
    info!("shutdown signal received, draining channel workers");

    router.shutdown_token().cancel();
    router.wait_for_drain().await;

    Ok(())
}

fn open_store(data_dir: &PathBuf, agent_id: &str) -> anyhow::Result<Arc<MemoryStore>> {
    let path = data_dir.join(format!("{agent_id}.sqlite3"));
    let conn = rusqlite::Connection::open(&path)?;
    Ok(Arc::new(MemoryStore::new(conn)?))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
