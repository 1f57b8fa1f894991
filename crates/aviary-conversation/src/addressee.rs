//! Addressee detection: is a message meant for the bot, or just ambient
//! channel chatter it may or may not choose to join?

use aviary_core::types::InboundMessage;

/// True when any of: the message is a DM; the bot is `<@id>`/`<@!id>`
/// mentioned; the message replies to a message the bot itself authored; or
/// the bot's display name appears case-insensitively in the content.
pub fn is_directly_addressed(msg: &InboundMessage, bot_user_id: &str, bot_display_name: &str) -> bool {
    if msg.is_dm {
        return true;
    }
    if mentions_user(&msg.content, bot_user_id) {
        return true;
    }
    if let Some(referenced) = &msg.referenced {
        if referenced.author_id == bot_user_id {
            return true;
        }
    }
    if !bot_display_name.is_empty() {
        let haystack = msg.content.to_lowercase();
        let needle = bot_display_name.to_lowercase();
        if haystack.contains(&needle) {
            return true;
        }
    }
    false
}

fn mentions_user(content: &str, user_id: &str) -> bool {
    content.contains(&format!("<@{user_id}>")) || content.contains(&format!("<@!{user_id}>"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_core::types::{ChannelId, ReferencedMessage, ServerId};

    fn base_message(content: &str) -> InboundMessage {
        InboundMessage {
            message_id: "1".to_string(),
            author_id: "user-1".to_string(),
            author_name: "someone".to_string(),
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
    fn dm_is_always_addressed() {
        let mut msg = base_message("hello");
        msg.is_dm = true;
        assert!(is_directly_addressed(&msg, "bot-1", "Aviary"));
    }

    #[test]
    fn mention_syntax_is_addressed() {
        let msg = base_message("hey <@bot-1> what's up");
        assert!(is_directly_addressed(&msg, "bot-1", "Aviary"));
        let msg2 = base_message("hey <@!bot-1> what's up");
        assert!(is_directly_addressed(&msg2, "bot-1", "Aviary"));
    }

    #[test]
    fn reply_to_bot_is_addressed() {
        let mut msg = base_message("yes that's right");
        msg.referenced = Some(ReferencedMessage {
            author_id: "bot-1".to_string(),
            author_name: "Aviary".to_string(),
            content: "are you sure?".to_string(),
            is_bot: true,
            media_placeholders: Vec::new(),
        });
        assert!(is_directly_addressed(&msg, "bot-1", "Aviary"));
    }

    #[test]
    fn name_in_text_is_addressed_case_insensitively() {
        let msg = base_message("hey AVIARY can you help");
        assert!(is_directly_addressed(&msg, "bot-1", "Aviary"));
    }

    #[test]
    fn ambient_chatter_is_not_addressed() {
        let msg = base_message("anyone want to grab lunch");
        assert!(!is_directly_addressed(&msg, "bot-1", "Aviary"));
    }
}
