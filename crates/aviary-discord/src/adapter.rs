//! The Discord concrete gateway adapter (§4.5).
//!
//! Thin by design: opens the platform session and keeps reconnecting
//! whenever it drops, an ever-reconnecting shell around a serenity client.
//! All turn-processing logic lives in `aviary-conversation`; this crate
//! only translates serenity events into `Router::route` calls and
//! implements the `GatewayAdapter` port the workers call back through.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use serenity::all::GetMessages;
use serenity::model::gateway::GatewayIntents;
use serenity::model::id::UserId;
use serenity::Client;
use tracing::{error, info, warn};

use aviary_conversation::{GatewayAdapter, PriorMessage};
use aviary_core::types::ChannelId;
use aviary_router::Router;

use crate::error::DiscordError;
use crate::handler::RoutingHandler;

/// The bot's own identity, filled in once the `ready` event fires. Shared
/// between the event handler (which learns it) and the adapter (which
/// serves it to the conversation workers for addressee detection).
#[derive(Default)]
pub(crate) struct BotIdentity {
    id: OnceLock<UserId>,
    id_str: OnceLock<String>,
}

impl BotIdentity {
    pub(crate) fn set(&self, id: UserId) {
        self.id.set(id).ok();
        self.id_str.set(id.to_string()).ok();
    }

    pub(crate) fn id(&self) -> Option<UserId> {
        self.id.get().copied()
    }
}

/// Discord gateway session: owns the serenity `Http` client for outbound
/// calls (send/react/fetch-history) and the bot's own identity.
pub struct DiscordAdapter {
    http: OnceLock<Arc<serenity::http::Http>>,
    identity: Arc<BotIdentity>,
    display_name: String,
    bot_token: String,
}

impl DiscordAdapter {
    pub fn new(bot_token: String, display_name: String) -> Arc<Self> {
        Arc::new(Self {
            http: OnceLock::new(),
            identity: Arc::new(BotIdentity::default()),
            display_name,
            bot_token,
        })
    }

    /// Connect to Discord and reconnect indefinitely whenever the gateway
    /// drops. Never returns; every inbound message is forwarded to
    /// `router.route`.
    pub async fn run(self: Arc<Self>, router: Arc<Router>) {
        if self.bot_token.is_empty() {
            error!("Discord: {}", DiscordError::NoToken);
            return;
        }

        let intents = GatewayIntents::GUILDS
            | GatewayIntents::GUILD_MESSAGES
            | GatewayIntents::DIRECT_MESSAGES
            | GatewayIntents::MESSAGE_CONTENT
            | GatewayIntents::GUILD_MESSAGE_REACTIONS;

        loop {
            match self.build_client(intents, Arc::clone(&router)).await {
                Ok(mut client) => {
                    self.http.get_or_init(|| Arc::clone(&client.http));
                    info!("Discord: gateway connecting");
                    if let Err(e) = client.start().await {
                        warn!("Discord: gateway error ({e}), reconnecting in 5s");
                    } else {
                        info!("Discord: gateway stopped cleanly, reconnecting in 5s");
                    }
                }
                Err(e) => {
                    error!("Discord: client build failed ({e}), retrying in 30s");
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    continue;
                }
            }
            tokio::time::sleep(Duration::from_secs(5)).await;
        }
    }

    async fn build_client(&self, intents: GatewayIntents, router: Arc<Router>) -> Result<Client, DiscordError> {
        let handler = RoutingHandler {
            identity: Arc::clone(&self.identity),
            router,
        };
        let client = Client::builder(&self.bot_token, intents)
            .event_handler(handler)
            .await?;
        Ok(client)
    }
}

#[async_trait]
impl GatewayAdapter for DiscordAdapter {
    async fn send_message(&self, channel_id: &ChannelId, content: &str) -> Result<(), String> {
        let http = self.http.get().ok_or_else(|| DiscordError::NotReady.to_string())?;
        serenity::model::id::ChannelId::new(channel_id.0)
            .say(http, content)
            .await
            .map(|_| ())
            .map_err(|e| e.to_string())
    }

    async fn add_reaction(&self, channel_id: &ChannelId, message_id: &str, emoji: &str) -> Result<(), String> {
        let http = self.http.get().ok_or_else(|| DiscordError::NotReady.to_string())?;
        let message_id: u64 = message_id.parse().map_err(|e| format!("invalid message id: {e}"))?;
        serenity::model::id::ChannelId::new(channel_id.0)
            .create_reaction(
                http,
                serenity::model::id::MessageId::new(message_id),
                serenity::model::channel::ReactionType::Unicode(emoji.to_string()),
            )
            .await
            .map_err(|e| e.to_string())
    }

    async fn fetch_history(&self, channel_id: &ChannelId, limit: usize) -> Result<Vec<PriorMessage>, String> {
        let http = self.http.get().ok_or_else(|| DiscordError::NotReady.to_string())?;
        let builder = GetMessages::new().limit(limit.min(100) as u8);
        let messages = serenity::model::id::ChannelId::new(channel_id.0)
            .messages(http, builder)
            .await
            .map_err(|e| e.to_string())?;
        Ok(messages.iter().map(crate::convert::to_prior_message).collect())
    }

    async fn start_typing(&self, channel_id: &ChannelId) -> Result<(), String> {
        let http = self.http.get().ok_or_else(|| DiscordError::NotReady.to_string())?;
        serenity::model::id::ChannelId::new(channel_id.0)
            .broadcast_typing(http)
            .await
            .map_err(|e| e.to_string())
    }

    fn bot_user_id(&self) -> &str {
        self.identity.id_str.get().map(String::as_str).unwrap_or("")
    }

    fn bot_display_name(&self) -> &str {
        &self.display_name
    }
}
