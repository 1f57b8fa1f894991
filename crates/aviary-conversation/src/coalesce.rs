//! Message coalescing: when several messages arrive in a short burst, they
//! are folded into one turn instead of triggering a reply per message.

use aviary_core::types::InboundMessage;

use crate::message_build::format_addressed_text;

/// Given a batch of messages that arrived close together (index 0 is the
/// earliest), render them as one coalesced user entry:
///
/// ```text
/// [N messages arrived rapidly in quick succession]
///
/// <username>: <content>
/// <username>: <content> (+2s)
/// ```
///
/// A single-message batch is rendered with no coalescing header at all —
/// callers should only invoke this once `batch.len() > 1`.
pub fn format_coalesced_batch(batch: &[InboundMessage]) -> String {
    if batch.len() == 1 {
        return format_addressed_text(&batch[0]);
    }

    let first_ts = batch[0].timestamp;
    let mut out = format!("[{} messages arrived rapidly in quick succession]\n\n", batch.len());
    for (i, msg) in batch.iter().enumerate() {
        let mut line = format_addressed_text(msg);
        if i > 0 {
            let gap = (msg.timestamp - first_ts).num_seconds();
            if gap >= 1 {
                line.push_str(&format!(" (+{gap}s)"));
            }
        }
        out.push_str(&line);
        if i + 1 < batch.len() {
            out.push('\n');
        }
    }
    out
}

/// The debounce/max-wait window for the batch-collection loop: keep
/// waiting for the next message up to `debounce` after the last one
/// arrived, never holding the batch open past `max_wait` from its first
/// message.
#[derive(Debug, Clone, Copy)]
pub struct CoalesceWindow {
    pub debounce: std::time::Duration,
    pub max_wait: std::time::Duration,
}

impl CoalesceWindow {
    pub fn new(debounce_ms: u64, max_wait_ms: u64) -> Self {
        Self {
            debounce: std::time::Duration::from_millis(debounce_ms),
            max_wait: std::time::Duration::from_millis(max_wait_ms),
        }
    }

    /// How long the collection loop should wait for the *next* message,
    /// given `elapsed` time since the batch's first message. Returns
    /// `None` once `max_wait` has already been exceeded — the caller
    /// should stop collecting immediately.
    pub fn next_wait(&self, elapsed: std::time::Duration) -> Option<std::time::Duration> {
        if elapsed >= self.max_wait {
            return None;
        }
        Some(self.debounce.min(self.max_wait - elapsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aviary_core::types::{ChannelId, ServerId};
    use chrono::Duration as ChronoDuration;

    fn msg_at(content: &str, offset_secs: i64) -> InboundMessage {
        InboundMessage {
            message_id: content.to_string(),
            author_id: "user-1".to_string(),
            author_name: "bob".to_string(),
            channel_id: ChannelId(1),
            server_id: ServerId::for_guild("guild-1"),
            content: content.to_string(),
            attachments: Vec::new(),
            embeds: Vec::new(),
            referenced: None,
            is_dm: false,
            timestamp: chrono::Utc::now() + ChronoDuration::seconds(offset_secs),
        }
    }

    #[test]
    fn single_message_has_no_header() {
        let batch = vec![msg_at("hi", 0)];
        assert_eq!(format_coalesced_batch(&batch), "bob: hi");
    }

    #[test]
    fn multi_message_batch_has_header_and_gaps() {
        let batch = vec![msg_at("hi", 0), msg_at("you there?", 2)];
        let text = format_coalesced_batch(&batch);
        assert!(text.starts_with("[2 messages arrived rapidly in quick succession]\n\n"));
        assert!(text.contains("bob: hi\n"));
        assert!(text.contains("bob: you there? (+2s)"));
    }

    #[test]
    fn sub_second_gap_has_no_suffix() {
        let batch = vec![msg_at("a", 0), msg_at("b", 0)];
        let text = format_coalesced_batch(&batch);
        assert!(!text.contains("(+0s)"));
    }

    #[test]
    fn next_wait_stops_past_max_wait() {
        let window = CoalesceWindow::new(1500, 4000);
        assert!(window.next_wait(std::time::Duration::from_millis(4000)).is_none());
        assert!(window.next_wait(std::time::Duration::from_millis(5000)).is_none());
    }

    #[test]
    fn next_wait_clamps_to_remaining_budget() {
        let window = CoalesceWindow::new(1500, 4000);
        let wait = window.next_wait(std::time::Duration::from_millis(3000)).unwrap();
        assert_eq!(wait, std::time::Duration::from_millis(1000));
    }
}
