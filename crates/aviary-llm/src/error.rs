use thiserror::Error;

/// Errors surfaced by the LLM client contract.
///
/// `Transient` failures (timeouts, 5xx, 429) are retried by the client
/// itself with bounded backoff before ever reaching the caller; anything
/// that reaches the caller as `Transient` means retries were exhausted.
/// `Permanent` failures (4xx other than 429, malformed responses) are
/// returned promptly without retry.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm transient failure: {0}")]
    Transient(String),

    #[error("llm permanent failure: {0}")]
    Permanent(String),
}

impl From<LlmError> for aviary_core::AviaryError {
    fn from(e: LlmError) -> Self {
        match e {
            LlmError::Transient(msg) => aviary_core::AviaryError::LlmProvider(msg),
            LlmError::Permanent(msg) => aviary_core::AviaryError::LlmProvider(msg),
        }
    }
}
