//! The serenity event handler. Per §4.5: filter events where the author is
//! missing, the bot itself, or another bot, then forward everything else
//! to `Router::route`. No other state or logic lives here.

use std::sync::Arc;

use serenity::async_trait;
use serenity::model::channel::Message;
use serenity::model::gateway::Ready;
use serenity::prelude::{Context, EventHandler};
use tracing::info;

use aviary_router::Router;

use crate::adapter::BotIdentity;
use crate::convert;

pub(crate) struct RoutingHandler {
    pub(crate) identity: Arc<BotIdentity>,
    pub(crate) router: Arc<Router>,
}

#[async_trait]
impl EventHandler for RoutingHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        self.identity.set(ready.user.id);
        info!(name = %ready.user.name, "Discord: gateway connected");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        // msg.author is never actually absent in serenity's model (it's
        // not an Option), but webhook-authored messages carry a
        // zero/system-like author in some deployments; bot-authored
        // messages (ourselves or any other bot) are filtered here per the
        // adapter contract.
        if msg.author.bot {
            return;
        }

        let Some(bot_id) = self.identity.id() else {
            return; // not ready yet; drop rather than buffer
        };
        if msg.author.id == bot_id {
            return;
        }

        let referenced = msg.referenced_message.as_deref();
        let inbound = convert::to_inbound(&msg, referenced, bot_id);

        let router = Arc::clone(&self.router);
        tokio::spawn(async move {
            router.route(inbound).await;
        });
    }
}
