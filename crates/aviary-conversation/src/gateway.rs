//! The full gateway adapter surface a worker needs: posting, reacting,
//! backfilling history, and the bot's own identity for addressee
//! detection. A thin per-channel binder (`ChannelGateway`) narrows this
//! down to the smaller `aviary_tools::GatewayPort` contract the `reply`
//! and `react` tools use, scoped to one channel and one triggering message.

use async_trait::async_trait;

use aviary_core::types::ChannelId;
use aviary_tools::GatewayPort;

/// One message returned by a history backfill fetch, before filtering.
#[derive(Debug, Clone)]
pub struct PriorMessage {
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub is_bot: bool,
}

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    async fn send_message(&self, channel_id: &ChannelId, content: &str) -> Result<(), String>;

    async fn add_reaction(
        &self,
        channel_id: &ChannelId,
        message_id: &str,
        emoji: &str,
    ) -> Result<(), String>;

    /// Up to `limit` messages preceding the channel's most recent state,
    /// oldest-first fetch order is not guaranteed — callers reverse.
    async fn fetch_history(
        &self,
        channel_id: &ChannelId,
        limit: usize,
    ) -> Result<Vec<PriorMessage>, String>;

    async fn start_typing(&self, channel_id: &ChannelId) -> Result<(), String>;

    fn bot_user_id(&self) -> &str;
    fn bot_display_name(&self) -> &str;
}

/// Binds a `GatewayAdapter` to one channel and one triggering message so it
/// can be handed to a turn's tool registry as a plain `GatewayPort`.
pub struct ChannelGateway {
    pub adapter: std::sync::Arc<dyn GatewayAdapter>,
    pub channel_id: ChannelId,
    pub trigger_message_id: String,
}

#[async_trait]
impl GatewayPort for ChannelGateway {
    async fn send_message(&self, content: &str) -> Result<(), String> {
        self.adapter.send_message(&self.channel_id, content).await
    }

    async fn add_reaction(&self, emoji: &str) -> Result<(), String> {
        self.adapter
            .add_reaction(&self.channel_id, &self.trigger_message_id, emoji)
            .await
    }
}
