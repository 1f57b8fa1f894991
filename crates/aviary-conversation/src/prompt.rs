//! System prompt assembly: personality text, a `## Relevant Memories`
//! block, an optional language directive, and the smart-mode
//! tools-only directive.

use chrono::{DateTime, Utc};

use aviary_memory::Memory;

/// Render one recalled memory as `- [<id>] (importance: X.X, <relative-age>) <content>`.
fn format_memory_line(memory: &Memory, now: DateTime<Utc>) -> String {
    let age = relative_age(&memory.updated_at, now);
    format!(
        "- [{}] (importance: {:.1}, {}) {}",
        memory.id, memory.importance, age, memory.content
    )
}

/// today / yesterday / N days ago / N weeks ago / N months ago.
fn relative_age(timestamp: &str, now: DateTime<Utc>) -> String {
    let Ok(parsed) = DateTime::parse_from_rfc3339(timestamp) else {
        return "unknown".to_string();
    };
    let parsed = parsed.with_timezone(&Utc);
    let days = (now.date_naive() - parsed.date_naive()).num_days();
    match days {
        d if d <= 0 => "today".to_string(),
        1 => "yesterday".to_string(),
        d if d < 7 => format!("{d} days ago"),
        d if d < 30 => format!("{} weeks ago", d / 7),
        d => format!("{} months ago", d / 30),
    }
}

/// Assemble the final system prompt string for one turn.
pub fn build_system_prompt(
    personality: &str,
    memories: &[Memory],
    now: DateTime<Utc>,
    language: Option<&str>,
    smart_mode: bool,
) -> String {
    let mut out = personality.to_string();

    if !memories.is_empty() {
        out.push_str("\n\n## Relevant Memories\n");
        for memory in memories {
            out.push('\n');
            out.push_str(&format_memory_line(memory, now));
        }
    }

    if let Some(lang) = language {
        out.push_str(&format!("\n\nAlways respond in {lang}."));
    }

    if smart_mode {
        out.push_str(
            "\n\nYou are in smart mode: you were not directly addressed. \
             Only communicate by calling the `reply` or `react` tools — any \
             plain-text output you produce here will be discarded unless \
             this turn was directly addressed to you.",
        );
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn memory_at(content: &str, updated_at: &str) -> Memory {
        Memory {
            id: "abc123".to_string(),
            content: content.to_string(),
            importance: 0.8,
            server_id: "guild-1".to_string(),
            user_id: None,
            channel_id: None,
            created_at: updated_at.to_string(),
            updated_at: updated_at.to_string(),
            forgotten: false,
        }
    }

    #[test]
    fn relative_age_bins() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        assert_eq!(relative_age("2026-07-29T08:00:00Z", now), "today");
        assert_eq!(relative_age("2026-07-28T08:00:00Z", now), "yesterday");
        assert_eq!(relative_age("2026-07-24T08:00:00Z", now), "5 days ago");
        assert_eq!(relative_age("2026-07-10T08:00:00Z", now), "2 weeks ago");
        assert_eq!(relative_age("2026-05-01T08:00:00Z", now), "2 months ago");
    }

    #[test]
    fn no_memories_block_when_empty() {
        let now = Utc::now();
        let prompt = build_system_prompt("You are Aviary.", &[], now, None, false);
        assert_eq!(prompt, "You are Aviary.");
    }

    #[test]
    fn memories_block_and_language_directive() {
        let now = Utc.with_ymd_and_hms(2026, 7, 29, 12, 0, 0).unwrap();
        let memories = vec![memory_at("likes tea", "2026-07-29T08:00:00Z")];
        let prompt = build_system_prompt("You are Aviary.", &memories, now, Some("French"), false);
        assert!(prompt.contains("## Relevant Memories"));
        assert!(prompt.contains("likes tea"));
        assert!(prompt.ends_with("Always respond in French."));
    }

    #[test]
    fn smart_mode_directive_appended() {
        let now = Utc::now();
        let prompt = build_system_prompt("You are Aviary.", &[], now, None, true);
        assert!(prompt.contains("smart mode"));
    }
}
