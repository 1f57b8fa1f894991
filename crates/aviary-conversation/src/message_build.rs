//! Turns one `InboundMessage` (or a coalesced batch of them) into the
//! `MessageContent` sent to the model: username-prefixed text, reply-to
//! annotation, and downloaded media encoded as vision/video content parts.

use base64::Engine;
use tracing::warn;

use aviary_core::types::{Attachment, Embed, EmbedKind, InboundMessage, ReferencedMessage};
use aviary_llm::{ContentPart, MessageContent};

/// Downloads attachment bytes and base64-encodes them as `data:` URIs.
/// Owns the per-worker HTTP client and the configured video size cap.
pub struct MediaDownloader {
    pub http: reqwest::Client,
    pub video_cap_bytes: u64,
}

impl MediaDownloader {
    pub fn new(video_cap_bytes: u64) -> Self {
        Self {
            http: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            video_cap_bytes,
        }
    }

    async fn attachment_to_part(&self, att: &Attachment) -> Option<ContentPart> {
        if att.mime_type.starts_with("image/") {
            let url = self.download_as_data_url(&att.url, &att.mime_type).await?;
            Some(ContentPart::ImageUrl { url })
        } else if att.mime_type.starts_with("video/") {
            if att.byte_size > self.video_cap_bytes {
                warn!(
                    byte_size = att.byte_size,
                    cap = self.video_cap_bytes,
                    "skipping video attachment over size cap"
                );
                return None;
            }
            let url = self.download_as_data_url(&att.url, &att.mime_type).await?;
            Some(ContentPart::VideoUrl { url })
        } else {
            Some(ContentPart::Text {
                text: format!("[unsupported attachment: {}]", att.mime_type),
            })
        }
    }

    fn embed_to_part(&self, embed: &Embed) -> Option<ContentPart> {
        match embed.kind {
            EmbedKind::Gif => embed
                .thumbnail_url
                .clone()
                .map(|url| ContentPart::ImageUrl { url }),
            EmbedKind::Other => None,
        }
    }

    async fn download_as_data_url(&self, url: &str, mime: &str) -> Option<String> {
        let resp = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, url, "media download failed");
                return None;
            }
        };
        if !resp.status().is_success() {
            warn!(status = %resp.status(), url, "media download returned non-success status");
            return None;
        }
        match resp.bytes().await {
            Ok(bytes) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(&bytes);
                Some(format!("data:{mime};base64,{encoded}"))
            }
            Err(e) => {
                warn!(error = %e, url, "media body read failed");
                None
            }
        }
    }

    /// Build the content parts for one message: the text part first, then
    /// any media parts that downloaded successfully. If every media part
    /// fails, the caller still gets a valid single-part text message.
    pub async fn build_content(&self, text: String, msg: &InboundMessage) -> MessageContent {
        let mut parts = vec![ContentPart::Text { text }];
        for att in &msg.attachments {
            if let Some(part) = self.attachment_to_part(att).await {
                parts.push(part);
            }
        }
        for embed in &msg.embeds {
            if let Some(part) = self.embed_to_part(embed) {
                parts.push(part);
            }
        }
        if parts.len() == 1 {
            match parts.into_iter().next().unwrap() {
                ContentPart::Text { text } => MessageContent::Text(text),
                other => MessageContent::Parts(vec![other]),
            }
        } else {
            MessageContent::Parts(parts)
        }
    }
}

/// `"<username>: <content>"`, or with a reply-to annotation:
/// `"<username> (replying to <ref_author>: \"<ref_snippet>\"): <content>"`.
pub fn format_addressed_text(msg: &InboundMessage) -> String {
    match &msg.referenced {
        Some(referenced) => format!(
            "{} (replying to {}: \"{}\"): {}",
            msg.author_name,
            referenced.author_name,
            reply_snippet(referenced),
            msg.content
        ),
        None => format!("{}: {}", msg.author_name, msg.content),
    }
}

fn reply_snippet(referenced: &ReferencedMessage) -> String {
    if !referenced.content.trim().is_empty() {
        referenced.content.clone()
    } else {
        referenced.media_placeholders.join(", ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_core::types::{ChannelId, ServerId};

    fn base_message(content: &str) -> InboundMessage {
        InboundMessage {
            message_id: "1".to_string(),
            author_id: "user-1".to_string(),
            author_name: "bob".to_string(),
            channel_id: ChannelId(1),
            server_id: ServerId::for_guild("guild-1"),
            content: content.to_string(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            referenced: None,
            is_dm: false,
            timestamp: chrono::Utc::now(),
        }
    }

    #[test]
    fn plain_text_gets_username_prefix() {
        let msg = base_message("hi there");
        assert_eq!(format_addressed_text(&msg), "bob: hi there");
    }

    #[test]
    fn reply_with_text_quotes_the_referenced_content() {
        let mut msg = base_message("yes exactly");
        msg.referenced = Some(ReferencedMessage {
            author_id: "a".to_string(),
            author_name: "alice".to_string(),
            content: "is it raining?".to_string(),
            is_bot: false,
            media_placeholders: Vec::new(),
        });
        assert_eq!(
            format_addressed_text(&msg),
            "bob (replying to alice: \"is it raining?\"): yes exactly"
        );
    }

    #[test]
    fn reply_to_media_only_uses_placeholder() {
        let mut msg = base_message("lol");
        msg.referenced = Some(ReferencedMessage {
            author_id: "a".to_string(),
            author_name: "alice".to_string(),
            content: String::new(),
            is_bot: false,
            media_placeholders: vec!["[image]".to_string(), "[gif]".to_string()],
        });
        assert_eq!(
            format_addressed_text(&msg),
            "bob (replying to alice: \"[image], [gif]\"): lol"
        );
    }
}
