use serde::{Deserialize, Serialize};
use std::fmt;

/// A tenant's identity. Platform-assigned guild/server id, or the synthetic
/// `DM:<user_id>` form for a per-user direct-message space.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ServerId(pub String);

impl ServerId {
    pub fn for_guild(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn for_dm(user_id: impl fmt::Display) -> Self {
        Self(format!("DM:{user_id}"))
    }

    pub fn is_dm(&self) -> bool {
        self.0.starts_with("DM:")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ServerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque channel identifier, scoped by gateway (Discord channel id, etc).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub u64);

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How aggressively a worker replies without being directly addressed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseMode {
    /// Never respond.
    None,
    /// Respond only when directly addressed.
    Mention,
    /// Always respond.
    All,
    /// Always invoke the model, but only let it speak through tools unless addressed.
    Smart,
}

impl Default for ResponseMode {
    fn default() -> Self {
        ResponseMode::Smart
    }
}

impl fmt::Display for ResponseMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResponseMode::None => write!(f, "none"),
            ResponseMode::Mention => write!(f, "mention"),
            ResponseMode::All => write!(f, "all"),
            ResponseMode::Smart => write!(f, "smart"),
        }
    }
}

impl std::str::FromStr for ResponseMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "none" => Ok(ResponseMode::None),
            "mention" => Ok(ResponseMode::Mention),
            "all" => Ok(ResponseMode::All),
            "smart" => Ok(ResponseMode::Smart),
            other => Err(format!("unknown response mode: {other}")),
        }
    }
}

/// Role tag for a history entry or a chat message sent to the LLM.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// An attachment on an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub mime_type: String,
    pub url: String,
    pub byte_size: u64,
}

/// An embed on an inbound message (e.g. a GIF posted as a link embed).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embed {
    pub kind: EmbedKind,
    pub thumbnail_url: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbedKind {
    Gif,
    Other,
}

/// The message being replied to, if any.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferencedMessage {
    pub author_id: String,
    pub author_name: String,
    pub content: String,
    pub is_bot: bool,
    /// Bracketed placeholders (`[image]`, `[video]`, `[gif]`) for a
    /// media-only referenced message, used when `content` is empty.
    #[serde(default)]
    pub media_placeholders: Vec<String>,
}

/// One inbound turn-input message from the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub message_id: String,
    pub author_id: String,
    pub author_name: String,
    pub channel_id: ChannelId,
    /// Empty for DMs.
    pub server_id: ServerId,
    pub content: String,
    pub attachments: Vec<Attachment>,
    pub embeds: Vec<Embed>,
    pub referenced: Option<ReferencedMessage>,
    pub is_dm: bool,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

/// A pending tool call emitted by the model, carried on an assistant history entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRecord {
    pub id: String,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// One entry in a worker's in-memory turn history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
    /// Present only on assistant entries that requested tool calls.
    #[serde(default)]
    pub tool_calls: Vec<ToolCallRecord>,
    /// Present only on tool entries: the call they answer.
    pub tool_call_id: Option<String>,
    pub tool_name: Option<String>,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn assistant_with_calls(calls: Vec<ToolCallRecord>) -> Self {
        Self {
            role: Role::Assistant,
            content: String::new(),
            tool_calls: calls,
            tool_call_id: None,
            tool_name: None,
        }
    }

    pub fn tool(call_id: impl Into<String>, name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
            tool_name: Some(name.into()),
        }
    }
}

/// Trim `history` to at most `cap` entries (drop from the head), then drop
/// leading entries that are not role=user. A history may never begin with
/// an assistant or tool entry.
pub fn sanitize_history(history: &mut Vec<HistoryEntry>, cap: usize) {
    if history.len() > cap {
        let drop = history.len() - cap;
        history.drain(0..drop);
    }
    while let Some(first) = history.first() {
        if first.role == Role::User {
            break;
        }
        history.remove(0);
    }
}
