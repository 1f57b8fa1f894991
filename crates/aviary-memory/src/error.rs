use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("memory not found: {0}")]
    NotFound(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<MemoryError> for aviary_core::AviaryError {
    fn from(e: MemoryError) -> Self {
        match e {
            MemoryError::NotFound(id) => aviary_core::AviaryError::MemoryNotFound(id),
            other => aviary_core::AviaryError::Database(other.to_string()),
        }
    }
}
