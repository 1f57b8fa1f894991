use serde::{Deserialize, Serialize};

/// Outcome of a `Save` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SaveStatus {
    Saved,
    Updated,
    Exists,
}

impl std::fmt::Display for SaveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SaveStatus::Saved => write!(f, "saved"),
            SaveStatus::Updated => write!(f, "updated"),
            SaveStatus::Exists => write!(f, "exists"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub id: String,
    pub status: SaveStatus,
}

/// A stored fact, scoped to a tenant and optionally a subject user/channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Memory {
    /// 32-char lowercase hex, 16 random bytes.
    pub id: String,
    pub content: String,
    /// 0.0-1.0.
    pub importance: f32,
    pub server_id: String,
    pub user_id: Option<String>,
    pub channel_id: Option<String>,
    pub created_at: String,
    pub updated_at: String,
    pub forgotten: bool,
}

/// Append-only record of one completed turn, kept for operator inspection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationLog {
    pub id: i64,
    pub channel_id: String,
    pub user_msg: String,
    /// JSON array of `{name, result}`.
    pub tool_calls_json: String,
    pub response: String,
    pub created_at: String,
}

/// A recalled memory row with the fusion machinery's internal rank score,
/// useful for debugging / tests; callers normally only need the `Memory`.
#[derive(Debug, Clone)]
pub struct RecalledMemory {
    pub memory: Memory,
    pub score: f64,
}
