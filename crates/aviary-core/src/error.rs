use thiserror::Error;

#[derive(Debug, Error)]
pub enum AviaryError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("memory not found: {0}")]
    MemoryNotFound(String),

    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("tool dispatch error: {0}")]
    ToolDispatch(String),

    #[error("gateway send error: {0}")]
    GatewaySend(String),

    #[error("mailbox full for channel {0}")]
    MailboxFull(String),

    #[error("drain timed out after {0}s")]
    DrainTimeout(u64),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("internal error: {0}")]
    Internal(String),
}

impl AviaryError {
    /// Short lower-case verb-noun-detail error code, stable across releases.
    pub fn code(&self) -> &'static str {
        match self {
            AviaryError::Config(_) => "config_invalid",
            AviaryError::Database(_) => "database_error",
            AviaryError::MemoryNotFound(_) => "memory_not_found",
            AviaryError::EmbeddingUnavailable(_) => "embedding_unavailable",
            AviaryError::LlmProvider(_) => "llm_transient",
            AviaryError::ToolDispatch(_) => "tool_dispatch_error",
            AviaryError::GatewaySend(_) => "gateway_send_error",
            AviaryError::MailboxFull(_) => "mailbox_full",
            AviaryError::DrainTimeout(_) => "drain_timeout",
            AviaryError::Serialization(_) => "serialization_error",
            AviaryError::Io(_) => "io_error",
            AviaryError::Internal(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, AviaryError>;
