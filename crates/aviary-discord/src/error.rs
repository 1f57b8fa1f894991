/// Errors produced by the Discord gateway adapter.
#[derive(Debug, thiserror::Error)]
pub enum DiscordError {
    #[error("serenity error: {0}")]
    Serenity(#[from] serenity::Error),

    #[error("no bot token configured")]
    NoToken,

    #[error("bot identity not yet known (ready event hasn't fired)")]
    NotReady,
}
