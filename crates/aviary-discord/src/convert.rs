//! Serenity `Message` → `aviary_core::types::InboundMessage`, and the
//! reverse direction for history backfill (`Message` → `PriorMessage`).

use serenity::model::channel::{Message, MessageReferenceKind};
use serenity::model::id::UserId;

use aviary_conversation::PriorMessage;
use aviary_core::types::{Attachment, ChannelId, Embed, EmbedKind, InboundMessage, ReferencedMessage, ServerId};

/// Convert one serenity message into the core's gateway-agnostic
/// `InboundMessage`, resolving the referenced (reply-to) message if one
/// was fetched alongside it.
pub fn to_inbound(msg: &Message, referenced: Option<&Message>, bot_id: UserId) -> InboundMessage {
    let server_id = match msg.guild_id {
        Some(guild_id) => ServerId::for_guild(guild_id.to_string()),
        None => ServerId::for_dm(msg.author.id),
    };

    InboundMessage {
        message_id: msg.id.to_string(),
        author_id: msg.author.id.to_string(),
        author_name: msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.name.clone()),
        channel_id: ChannelId(msg.channel_id.get()),
        server_id,
        content: msg.content.clone(),
        attachments: msg.attachments.iter().map(to_attachment).collect(),
        embeds: msg.embeds.iter().map(to_embed).collect(),
        referenced: referenced.map(|r| to_referenced(r, bot_id)),
        is_dm: msg.guild_id.is_none(),
        timestamp: msg.timestamp.to_utc(),
    }
}

fn to_attachment(att: &serenity::model::channel::Attachment) -> Attachment {
    Attachment {
        mime_type: att
            .content_type
            .clone()
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        url: att.url.clone(),
        byte_size: att.size as u64,
    }
}

fn to_embed(embed: &serenity::model::channel::Embed) -> Embed {
    let is_gif = embed
        .url
        .as_deref()
        .map(|u| u.to_ascii_lowercase().ends_with(".gif"))
        .unwrap_or(false)
        || embed.kind.as_deref() == Some("gifv");

    Embed {
        kind: if is_gif { EmbedKind::Gif } else { EmbedKind::Other },
        thumbnail_url: embed.thumbnail.as_ref().map(|t| t.url.clone()),
    }
}

fn to_referenced(r: &Message, bot_id: UserId) -> ReferencedMessage {
    let mut placeholders = Vec::new();
    for att in &r.attachments {
        let ct = att.content_type.as_deref().unwrap_or("");
        if ct.starts_with("image/") {
            placeholders.push("[image]".to_string());
        } else if ct.starts_with("video/") {
            placeholders.push("[video]".to_string());
        }
    }
    for embed in &r.embeds {
        if to_embed(embed).kind == EmbedKind::Gif {
            placeholders.push("[gif]".to_string());
        }
    }

    ReferencedMessage {
        author_id: r.author.id.to_string(),
        author_name: r
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| r.author.name.clone()),
        content: r.content.clone(),
        is_bot: r.author.id == bot_id,
        media_placeholders: placeholders,
    }
}

/// True if `msg` is a reply whose referenced message's author is `bot_id`.
pub fn is_reply_to_bot(msg: &Message, bot_id: UserId) -> bool {
    msg.message_reference
        .as_ref()
        .map(|r| r.kind == MessageReferenceKind::Default)
        .unwrap_or(false)
        && msg
            .referenced_message
            .as_deref()
            .map(|r| r.author.id == bot_id)
            .unwrap_or(false)
}

pub fn to_prior_message(msg: &Message) -> PriorMessage {
    PriorMessage {
        author_id: msg.author.id.to_string(),
        author_name: msg
            .author
            .global_name
            .clone()
            .unwrap_or_else(|| msg.author.name.clone()),
        content: msg.content.clone(),
        is_bot: msg.author.bot,
    }
}
