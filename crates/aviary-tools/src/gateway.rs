//! The slice of the gateway adapter contract that tools
//! need: posting text and reacting, both scoped to the channel a turn's
//! tool registry was built for.

use async_trait::async_trait;

#[async_trait]
pub trait GatewayPort: Send + Sync {
    /// Send `content` verbatim (already split to the platform limit by the
    /// caller — see `reply::split_message`).
    async fn send_message(&self, content: &str) -> Result<(), String>;

    async fn add_reaction(&self, emoji: &str) -> Result<(), String>;
}
