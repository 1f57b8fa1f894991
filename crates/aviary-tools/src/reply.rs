//! The `reply` tool: splits at the platform message-length limit (2000
//! UTF-16 code units), respecting surrogate pair boundaries, then sends
//! each part and records the registry's `replied`/`reply_text` observables.
//! Prefers a whitespace boundary within the lookback window over cutting
//! mid-word, and counts UTF-16 code units rather than bytes so emoji and
//! other astral-plane characters never get split across parts.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use aviary_core::config::MESSAGE_LIMIT_UTF16_UNITS;

use crate::gateway::GatewayPort;
use crate::registry::{Tool, ToolOutcome};

/// Split `text` into parts of at most `limit` UTF-16 code units each,
/// never cutting a surrogate pair. Concatenating the parts reproduces
/// `text` exactly.
pub fn split_message(text: &str, limit: usize) -> Vec<String> {
    if text.is_empty() {
        return vec![String::new()];
    }

    let units: Vec<u16> = text.encode_utf16().collect();
    if units.len() <= limit {
        return vec![text.to_string()];
    }

    let mut parts = Vec::new();
    let mut start = 0usize;
    while start < units.len() {
        let mut end = (start + limit).min(units.len());
        // Never split between a high and low surrogate.
        if end < units.len() && is_high_surrogate(units[end - 1]) && is_low_surrogate(units[end]) {
            end -= 1;
        }
        // Prefer breaking on a newline/space boundary within the window,
        // scanning back from the hard cut.
        if end < units.len() {
            if let Some(adjusted) = prefer_boundary(&units, start, end) {
                end = adjusted;
            }
        }
        if end <= start {
            end = (start + limit).min(units.len());
        }
        let chunk = String::from_utf16_lossy(&units[start..end]);
        parts.push(chunk);
        start = end;
    }
    parts
}

fn is_high_surrogate(u: u16) -> bool {
    (0xD800..=0xDBFF).contains(&u)
}

fn is_low_surrogate(u: u16) -> bool {
    (0xDC00..=0xDFFF).contains(&u)
}

/// Scan back from `end` toward `start` for a newline, falling back to a
/// space, within a small lookback window so we don't produce a tiny chunk.
fn prefer_boundary(units: &[u16], start: usize, end: usize) -> Option<usize> {
    let lookback = end.saturating_sub(200).max(start);
    for i in (lookback..end).rev() {
        if units[i] == b'\n' as u16 {
            return Some(i + 1);
        }
    }
    for i in (lookback..end).rev() {
        if units[i] == b' ' as u16 {
            return Some(i + 1);
        }
    }
    None
}

pub struct ReplyTool {
    pub gateway: Arc<dyn GatewayPort>,
}

#[async_trait]
impl Tool for ReplyTool {
    fn name(&self) -> &str {
        "reply"
    }

    fn description(&self) -> &str {
        "Send a message to the channel. This is the only way to speak to users in smart/mention-gated modes."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        json!({
            "type": "object",
            "properties": { "content": { "type": "string" } },
            "required": ["content"],
        })
    }

    async fn call(&self, args: serde_json::Value) -> ToolOutcome {
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return ToolOutcome::err("missing required argument: content");
        };

        for part in split_message(content, MESSAGE_LIMIT_UTF16_UNITS) {
            if let Err(e) = self.gateway.send_message(&part).await {
                return ToolOutcome::err(format!("send failed: {e}"));
            }
        }

        // `replied`/`reply_text` are recorded by `ToolRegistry::dispatch`,
        // which observes this tool's name and args after a successful call.
        ToolOutcome::ok("sent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_round_trips_as_single_part() {
        let parts = split_message("hello", 2000);
        assert_eq!(parts, vec!["hello".to_string()]);
    }

    #[test]
    fn long_text_splits_and_concatenates_back() {
        let text = "word ".repeat(1000);
        let parts = split_message(&text, 2000);
        assert!(parts.len() > 1);
        for p in &parts {
            assert!(p.encode_utf16().count() <= 2000);
        }
        assert_eq!(parts.concat(), text);
    }

    #[test]
    fn never_splits_a_surrogate_pair() {
        // A string of supplementary-plane emoji: each is 2 UTF-16 units.
        let text = "\u{1F600}".repeat(1500);
        let parts = split_message(&text, 2000);
        assert_eq!(parts.concat(), text);
        for p in &parts {
            // Every part must itself be valid (no lone surrogate produced
            // by from_utf16_lossy would appear as U+FFFD).
            assert!(!p.contains('\u{FFFD}'));
        }
    }
}
