//! Turning a raw history backfill fetch into seed `HistoryEntry` rows for
//! a freshly spawned worker's first turn.

use aviary_core::types::HistoryEntry;

use crate::gateway::PriorMessage;

/// Reverse `raw` into chronological order, drop bot-authored and empty
/// messages, tag the remainder as `user`, and trim to `cap`. Bot-authored
/// entries are surfaced separately as `role=assistant` rows so the model
/// can see its own prior turns too.
pub fn build_backfill_history(mut raw: Vec<PriorMessage>, cap: usize) -> Vec<HistoryEntry> {
    raw.reverse();
    let mut entries: Vec<HistoryEntry> = raw
        .into_iter()
        .filter(|m| !m.content.trim().is_empty())
        .map(|m| {
            if m.is_bot {
                HistoryEntry::assistant(m.content)
            } else {
                HistoryEntry::user(format!("{}: {}", m.author_name, m.content))
            }
        })
        .collect();

    if entries.len() > cap {
        let drop = entries.len() - cap;
        entries.drain(0..drop);
    }
    entries
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prior(author: &str, content: &str, is_bot: bool) -> PriorMessage {
        PriorMessage {
            author_id: format!("id-{author}"),
            author_name: author.to_string(),
            content: content.to_string(),
            is_bot,
        }
    }

    #[test]
    fn reverses_and_filters_empty() {
        let raw = vec![
            prior("bob", "", false),
            prior("bob", "hi", false),
            prior("alice", "yo", false),
        ];
        let out = build_backfill_history(raw, 100);
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].content, "alice: yo");
        assert_eq!(out[1].content, "bob: hi");
    }

    #[test]
    fn bot_messages_become_assistant_entries() {
        let raw = vec![prior("Aviary", "hello there", true)];
        let out = build_backfill_history(raw, 100);
        assert_eq!(out[0].content, "hello there");
        assert_eq!(out[0].role, aviary_core::types::Role::Assistant);
    }

    #[test]
    fn trims_to_cap() {
        let raw: Vec<_> = (0..10).map(|i| prior("bob", &i.to_string(), false)).collect();
        let out = build_backfill_history(raw, 3);
        assert_eq!(out.len(), 3);
    }
}
