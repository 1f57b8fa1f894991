//! One coalesced turn: memory recall, the tool-call cycle, output
//! suppression, persistence, and history update.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::warn;

use aviary_core::config::{MemoryConfig, RuntimeConfig};
use aviary_core::types::{HistoryEntry, InboundMessage, ResponseMode, Role, ToolCallRecord};
use aviary_llm::{ChatClient, ChatChoice, ChatMessage, ChatRole, EmbeddingClient, MessageContent};
use aviary_memory::{Memory, MemoryStore};
use aviary_tools::{build_full_registry, GatewayPort, SearchDelivery, ToolRegistry, ToolRegistryConfig};

use crate::coalesce::format_coalesced_batch;
use crate::message_build::MediaDownloader;
use crate::prompt::build_system_prompt;

const GENERIC_FALLBACK: &str = "I wasn't able to come up with a reply to that.";
const ITERATION_CAP_APOLOGY: &str = "Sorry, I'm having trouble with that one — could you try again?";

/// Everything a turn needs that's stable across the worker's lifetime.
pub struct TurnContext {
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub chat: Arc<dyn ChatClient>,
    pub gateway: Arc<dyn GatewayPort>,
    pub server_id: String,
    pub channel_id: String,
    pub personality: String,
    pub language: Option<String>,
    pub response_mode: ResponseMode,
    pub runtime: RuntimeConfig,
    pub memory: MemoryConfig,
    pub web_timeout: Duration,
    pub search_running: Arc<AtomicBool>,
    pub search_delivery: mpsc::Sender<SearchDelivery>,
}

/// Run one coalesced turn: `batch` is one or more messages collapsed by the
/// coalescing window, `addressed` is whether the batch's last message was
/// directly addressed, `pending_search` is any `web_search` deliveries that
/// arrived since the previous turn.
pub async fn process_turn(
    ctx: &TurnContext,
    media: &MediaDownloader,
    history: &mut Vec<HistoryEntry>,
    turn_count: &mut u64,
    batch: &[InboundMessage],
    addressed: bool,
    pending_search: Vec<SearchDelivery>,
) {
    let Some(last) = batch.last() else { return };
    let user_text = format_coalesced_batch(batch);
    let user_content = media.build_content(user_text.clone(), last).await;

    let query_embedding = try_embed(ctx.embeddings.as_ref(), &user_text).await;
    let user_biased = ctx
        .store
        .recall_by_user(&ctx.server_id, &last.author_id, ctx.memory.recall_limit / 2)
        .unwrap_or_default();
    let content_relevant = ctx
        .store
        .recall(
            &user_text,
            &ctx.server_id,
            ctx.memory.recall_limit,
            ctx.memory.recall_threshold,
            query_embedding.as_deref(),
        )
        .unwrap_or_default();
    let recalled = merge_recalled(user_biased, content_relevant, ctx.memory.recall_limit);

    let smart_mode = ctx.response_mode == ResponseMode::Smart && !addressed;
    let system_prompt = build_system_prompt(
        &ctx.personality,
        &recalled,
        chrono::Utc::now(),
        ctx.language.as_deref(),
        smart_mode,
    );

    let registry = build_full_registry(ToolRegistryConfig {
        store: Arc::clone(&ctx.store),
        embeddings: Arc::clone(&ctx.embeddings),
        chat: Arc::clone(&ctx.chat),
        gateway: Arc::clone(&ctx.gateway),
        server_id: ctx.server_id.clone(),
        default_user_id: Some(last.author_id.clone()),
        channel_id: Some(ctx.channel_id.clone()),
        dedup_threshold: ctx.memory.dedup_threshold,
        recall_limit: ctx.memory.recall_limit,
        web_timeout: ctx.web_timeout,
        search_running: Arc::clone(&ctx.search_running),
        search_delivery: ctx.search_delivery.clone(),
    });

    let mut messages = vec![ChatMessage {
        role: ChatRole::System,
        content: MessageContent::text(system_prompt),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }];
    for entry in history.iter() {
        messages.push(to_chat_message(entry));
    }
    for delivery in &pending_search {
        let entry = HistoryEntry {
            role: Role::System,
            content: format!("[search result for \"{}\"]\n{}", delivery.query, delivery.result),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        };
        messages.push(to_chat_message(&entry));
        history.push(entry);
    }
    messages.push(ChatMessage {
        role: ChatRole::User,
        content: user_content,
        tool_calls: Vec::new(),
        tool_call_id: None,
    });

    let mut new_entries: Vec<HistoryEntry> = vec![HistoryEntry::user(user_text.clone())];
    let cycle = match run_tool_cycle(&ctx.chat, &registry, messages, ctx.runtime.max_tool_iterations).await {
        Some(c) => c,
        None => {
            let _ = ctx.gateway.send_message(ITERATION_CAP_APOLOGY).await;
            return;
        }
    };
    new_entries.extend(cycle.new_entries);
    let turn_tool_calls = cycle.turn_tool_calls;
    let assistant_text = cycle.assistant_text;
    if !assistant_text.is_empty() {
        new_entries.push(HistoryEntry::assistant(assistant_text.clone()));
    }

    let mut sent_text: Option<String> = None;
    match finalize_output(&assistant_text, ctx.response_mode, addressed, registry.replied()) {
        FinalOutput::Send(text) => {
            for part in aviary_tools::reply::split_message(&text, aviary_core::config::MESSAGE_LIMIT_UTF16_UNITS) {
                if let Err(e) = ctx.gateway.send_message(&part).await {
                    warn!(error = %e, "failed to send plain-text turn output");
                }
            }
            sent_text = Some(text);
        }
        FinalOutput::FallbackNeeded => {
            let _ = ctx.gateway.send_message(GENERIC_FALLBACK).await;
            sent_text = Some(GENERIC_FALLBACK.to_string());
        }
        FinalOutput::Suppressed => {}
    }

    // A response happened if the `reply` tool fired mid-cycle, or the final
    // plain text (or a generic fallback) actually made it to the channel.
    let response_for_log = registry.reply_text().or(sent_text);
    if let Some(response_for_log) = response_for_log {
        let tool_calls_json = serde_json::to_string(
            &turn_tool_calls
                .iter()
                .map(|(name, result)| serde_json::json!({ "name": name, "result": result }))
                .collect::<Vec<_>>(),
        )
        .unwrap_or_else(|_| "[]".to_string());
        if let Err(e) = ctx.store.log_conversation(&ctx.channel_id, &user_text, &tool_calls_json, &response_for_log) {
            warn!(error = %e, "failed to persist conversation log");
        }
    }

    history.extend(new_entries);
    aviary_core::types::sanitize_history(history, ctx.runtime.history_limit);
    *turn_count += 1;

    if ctx.runtime.memory_extraction_interval > 0
        && *turn_count % (ctx.runtime.memory_extraction_interval as u64) == 0
    {
        spawn_memory_extraction(ctx, history.clone());
    }
}

/// Run a turn with no new inbound message — just `web_search` deliveries
/// that arrived while the worker was otherwise idle. Injects each delivery
/// as a system-tagged message and runs the usual tool cycle so the model
/// can act on results (reply, react, save a memory) without waiting for
/// another user message to arrive.
pub async fn process_search_delivery_turn(
    ctx: &TurnContext,
    history: &mut Vec<HistoryEntry>,
    turn_count: &mut u64,
    pending_search: Vec<SearchDelivery>,
) {
    if pending_search.is_empty() {
        return;
    }

    let smart_mode = ctx.response_mode == ResponseMode::Smart;
    let system_prompt = build_system_prompt(&ctx.personality, &[], chrono::Utc::now(), ctx.language.as_deref(), smart_mode);

    let registry = build_full_registry(ToolRegistryConfig {
        store: Arc::clone(&ctx.store),
        embeddings: Arc::clone(&ctx.embeddings),
        chat: Arc::clone(&ctx.chat),
        gateway: Arc::clone(&ctx.gateway),
        server_id: ctx.server_id.clone(),
        default_user_id: None,
        channel_id: Some(ctx.channel_id.clone()),
        dedup_threshold: ctx.memory.dedup_threshold,
        recall_limit: ctx.memory.recall_limit,
        web_timeout: ctx.web_timeout,
        search_running: Arc::clone(&ctx.search_running),
        search_delivery: ctx.search_delivery.clone(),
    });

    let mut messages = vec![ChatMessage {
        role: ChatRole::System,
        content: MessageContent::text(system_prompt),
        tool_calls: Vec::new(),
        tool_call_id: None,
    }];
    for entry in history.iter() {
        messages.push(to_chat_message(entry));
    }

    let mut new_entries: Vec<HistoryEntry> = Vec::new();
    for delivery in &pending_search {
        let entry = HistoryEntry {
            role: Role::System,
            content: format!("[search result for \"{}\"]\n{}", delivery.query, delivery.result),
            tool_calls: Vec::new(),
            tool_call_id: None,
            tool_name: None,
        };
        messages.push(to_chat_message(&entry));
        new_entries.push(entry);
    }

    let cycle = match run_tool_cycle(&ctx.chat, &registry, messages, ctx.runtime.max_tool_iterations).await {
        Some(c) => c,
        None => {
            // No channel to apologize toward in particular; log and drop —
            // the search results still got appended to history above.
            warn!("search-delivery turn failed or hit the iteration cap");
            history.extend(new_entries);
            aviary_core::types::sanitize_history(history, ctx.runtime.history_limit);
            return;
        }
    };
    new_entries.extend(cycle.new_entries);
    let assistant_text = cycle.assistant_text;
    if !assistant_text.is_empty() {
        new_entries.push(HistoryEntry::assistant(assistant_text.clone()));
    }

    // Never directly addressed — a bare search delivery carries no inbound
    // message — so the usual smart-mode/stage-direction suppression rules
    // apply in full, with no addressed-exemption.
    match finalize_output(&assistant_text, ctx.response_mode, false, registry.replied()) {
        FinalOutput::Send(text) => {
            for part in aviary_tools::reply::split_message(&text, aviary_core::config::MESSAGE_LIMIT_UTF16_UNITS) {
                if let Err(e) = ctx.gateway.send_message(&part).await {
                    warn!(error = %e, "failed to send search-delivery turn output");
                }
            }
        }
        FinalOutput::FallbackNeeded | FinalOutput::Suppressed => {}
    }

    if let Some(response_for_log) = registry.reply_text() {
        let queries = pending_search.iter().map(|d| d.query.as_str()).collect::<Vec<_>>().join(", ");
        let user_msg = format!("[search results delivered for: {queries}]");
        if let Err(e) = ctx.store.log_conversation(&ctx.channel_id, &user_msg, "[]", &response_for_log) {
            warn!(error = %e, "failed to persist conversation log");
        }
    }

    history.extend(new_entries);
    aviary_core::types::sanitize_history(history, ctx.runtime.history_limit);
    *turn_count += 1;

    if ctx.runtime.memory_extraction_interval > 0
        && *turn_count % (ctx.runtime.memory_extraction_interval as u64) == 0
    {
        spawn_memory_extraction(ctx, history.clone());
    }
}

/// Outcome of one tool-call cycle: the LLM is called repeatedly, dispatching
/// any tool calls it makes, until it produces plain text or the iteration
/// cap is hit. Returns `None` on an LLM error or when the cap is hit without
/// a terminal text response — callers treat both as "abandon this turn".
struct ToolCycleResult {
    new_entries: Vec<HistoryEntry>,
    turn_tool_calls: Vec<(String, String)>,
    assistant_text: String,
}

async fn run_tool_cycle(
    chat: &Arc<dyn ChatClient>,
    registry: &ToolRegistry,
    mut messages: Vec<ChatMessage>,
    max_iterations: u32,
) -> Option<ToolCycleResult> {
    let mut new_entries = Vec::new();
    let mut turn_tool_calls: Vec<(String, String)> = Vec::new();

    for _ in 0..max_iterations {
        let choice = match chat.chat(&messages, &registry.definitions()).await {
            Ok(c) => c,
            Err(e) => {
                warn!(error = %e, "llm call failed, abandoning turn");
                return None;
            }
        };

        match &choice {
            ChatChoice::ToolCalls(calls) if !calls.is_empty() => {
                let records: Vec<ToolCallRecord> = calls
                    .iter()
                    .map(|c| ToolCallRecord {
                        id: c.id.clone(),
                        name: c.name.clone(),
                        arguments: c.arguments.clone(),
                    })
                    .collect();
                messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: MessageContent::text(""),
                    tool_calls: calls.clone(),
                    tool_call_id: None,
                });
                new_entries.push(HistoryEntry::assistant_with_calls(records));

                for call in calls {
                    let outcome = registry.dispatch(&call.name, call.arguments.clone()).await;
                    let result_text = if outcome.is_error {
                        format!("Error: {}", outcome.content)
                    } else {
                        outcome.content.clone()
                    };
                    turn_tool_calls.push((call.name.clone(), result_text.clone()));
                    messages.push(ChatMessage {
                        role: ChatRole::Tool,
                        content: MessageContent::text(result_text.clone()),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(call.id.clone()),
                    });
                    new_entries.push(HistoryEntry::tool(call.id.clone(), call.name.clone(), result_text));
                }
            }
            ChatChoice::Text(text) => {
                return Some(ToolCycleResult {
                    new_entries,
                    turn_tool_calls,
                    assistant_text: text.clone(),
                });
            }
            ChatChoice::ToolCalls(_) => {
                return Some(ToolCycleResult {
                    new_entries,
                    turn_tool_calls,
                    assistant_text: String::new(),
                });
            }
        }
    }

    None
}

enum FinalOutput {
    Send(String),
    FallbackNeeded,
    Suppressed,
}

/// Apply the output suppression ladder to the tool loop's terminal text.
fn finalize_output(text: &str, mode: ResponseMode, addressed: bool, already_replied: bool) -> FinalOutput {
    let trimmed = text.trim();

    if looks_like_tool_call(trimmed) {
        return if mode != ResponseMode::Smart && !already_replied {
            FinalOutput::FallbackNeeded
        } else {
            FinalOutput::Suppressed
        };
    }

    // The `reply` tool already delivered this turn's real output; trailing
    // plain text from the wind-down iteration is not a second reply.
    if already_replied {
        return FinalOutput::Suppressed;
    }

    if trimmed.is_empty() {
        return FinalOutput::Suppressed;
    }

    if addressed {
        return FinalOutput::Send(trimmed.to_string());
    }

    if mode == ResponseMode::Smart {
        return FinalOutput::Suppressed;
    }

    if is_stage_direction(trimmed) {
        return FinalOutput::Suppressed;
    }

    FinalOutput::Send(trimmed.to_string())
}

/// Any line that looks like `tool_name(...)` — a model hallucinating a
/// textual call instead of actually invoking the tool.
fn looks_like_tool_call(text: &str) -> bool {
    text.lines().any(|line| {
        let line = line.trim_start();
        let Some(paren) = line.find('(') else { return false };
        if paren == 0 || !line.ends_with(')') {
            return false;
        }
        line[..paren].chars().all(|c| c.is_alphanumeric() || c == '_')
    })
}

/// A single-line parenthesized aside, e.g. `(nods quietly)`.
fn is_stage_direction(text: &str) -> bool {
    text.lines().count() == 1 && text.starts_with('(') && text.ends_with(')')
}

fn to_chat_message(entry: &HistoryEntry) -> ChatMessage {
    let role = match entry.role {
        Role::System => ChatRole::System,
        Role::User => ChatRole::User,
        Role::Assistant => ChatRole::Assistant,
        Role::Tool => ChatRole::Tool,
    };
    ChatMessage {
        role,
        content: MessageContent::text(entry.content.clone()),
        tool_calls: entry
            .tool_calls
            .iter()
            .map(|c| aviary_llm::ToolCallOut {
                id: c.id.clone(),
                name: c.name.clone(),
                arguments: c.arguments.clone(),
            })
            .collect(),
        tool_call_id: entry.tool_call_id.clone(),
    }
}

/// User-biased results take precedence; content-relevant results fill in
/// behind them, deduped by id, truncated to `limit`.
fn merge_recalled(user_biased: Vec<Memory>, content_relevant: Vec<Memory>, limit: usize) -> Vec<Memory> {
    let mut seen = std::collections::HashSet::new();
    let mut merged = Vec::with_capacity(limit);
    for m in user_biased.into_iter().chain(content_relevant) {
        if merged.len() >= limit {
            break;
        }
        if seen.insert(m.id.clone()) {
            merged.push(m);
        }
    }
    merged
}

async fn try_embed(client: &dyn EmbeddingClient, text: &str) -> Option<Vec<f32>> {
    match client.embed(text).await {
        Ok(v) => Some(v),
        Err(e) => {
            warn!(error = %e, "embedding unavailable for recall, falling back to keyword search only");
            None
        }
    }
}

const EXTRACTION_SYSTEM_PROMPT: &str = "You are a memory extraction pass. Review the conversation \
history and call `memory_save` for any facts worth remembering about the participants. Call \
`memory_forget` for anything that is now stale or contradicted. Do not reply to the channel. \
When nothing is worth saving, make no tool calls.";

/// Fire-and-forget background pass: re-sends a snapshot of `history` to the
/// model with a memory-only tool registry (no `reply`/`react`, so it can
/// never speak in the channel) and an extraction-only system prompt.
/// Bounded to 60 seconds.
fn spawn_memory_extraction(ctx: &TurnContext, history: Vec<HistoryEntry>) {
    let store = Arc::clone(&ctx.store);
    let embeddings = Arc::clone(&ctx.embeddings);
    let chat = Arc::clone(&ctx.chat);
    let server_id = ctx.server_id.clone();
    let dedup_threshold = ctx.memory.dedup_threshold;
    let recall_limit = ctx.memory.recall_limit;
    let max_iterations = ctx.runtime.max_tool_iterations;

    tokio::spawn(async move {
        let work = async {
            let registry = aviary_tools::build_memory_only_registry(
                Arc::clone(&store),
                Arc::clone(&embeddings),
                server_id.clone(),
                dedup_threshold,
                recall_limit,
            );
            let mut messages = vec![ChatMessage {
                role: ChatRole::System,
                content: MessageContent::text(EXTRACTION_SYSTEM_PROMPT),
                tool_calls: Vec::new(),
                tool_call_id: None,
            }];
            for entry in &history {
                messages.push(to_chat_message(entry));
            }

            for _ in 0..max_iterations {
                let choice = match chat.chat(&messages, &registry.definitions()).await {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(error = %e, "memory extraction llm call failed");
                        return;
                    }
                };
                let calls = choice.tool_calls();
                if calls.is_empty() {
                    return;
                }
                messages.push(ChatMessage {
                    role: ChatRole::Assistant,
                    content: MessageContent::text(""),
                    tool_calls: calls.to_vec(),
                    tool_call_id: None,
                });
                for call in calls {
                    let outcome = registry.dispatch(&call.name, call.arguments.clone()).await;
                    messages.push(ChatMessage {
                        role: ChatRole::Tool,
                        content: MessageContent::text(outcome.content),
                        tool_calls: Vec::new(),
                        tool_call_id: Some(call.id.clone()),
                    });
                }
            }
        };

        if tokio::time::timeout(
            Duration::from_secs(aviary_core::config::MEMORY_EXTRACTION_TIMEOUT_SECS),
            work,
        )
        .await
        .is_err()
        {
            warn!("memory extraction pass timed out");
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tool_call_looking_text_is_detected() {
        assert!(looks_like_tool_call("memory_save(content=\"x\")"));
        assert!(!looks_like_tool_call("I think that's a great idea!"));
        assert!(!looks_like_tool_call("(quietly nods)"));
    }

    #[test]
    fn stage_direction_is_detected() {
        assert!(is_stage_direction("(waves)"));
        assert!(!is_stage_direction("(waves) and says hi"));
        assert!(!is_stage_direction("line one\n(line two)"));
    }

    #[test]
    fn addressed_turn_bypasses_smart_mode_suppression() {
        match finalize_output("just chatting", ResponseMode::Smart, true, false) {
            FinalOutput::Send(text) => assert_eq!(text, "just chatting"),
            _ => panic!("expected Send"),
        }
    }

    #[test]
    fn unaddressed_smart_mode_text_is_suppressed() {
        match finalize_output("just chatting", ResponseMode::Smart, false, false) {
            FinalOutput::Suppressed => {}
            _ => panic!("expected Suppressed"),
        }
    }

    #[test]
    fn already_replied_suppresses_trailing_text() {
        match finalize_output("anything else?", ResponseMode::All, false, true) {
            FinalOutput::Suppressed => {}
            _ => panic!("expected Suppressed"),
        }
    }

    #[test]
    fn tool_call_looking_text_falls_back_outside_smart_mode() {
        match finalize_output("memory_save(content=\"x\")", ResponseMode::All, false, false) {
            FinalOutput::FallbackNeeded => {}
            _ => panic!("expected FallbackNeeded"),
        }
    }

    #[test]
    fn merge_recalled_dedups_preserving_user_bias_precedence() {
        let a = Memory {
            id: "1".into(),
            content: "user-biased".into(),
            importance: 0.5,
            server_id: "s".into(),
            user_id: None,
            channel_id: None,
            created_at: "now".into(),
            updated_at: "now".into(),
            forgotten: false,
        };
        let mut b = a.clone();
        b.content = "content-relevant-duplicate".into();
        let c = Memory { id: "2".into(), ..a.clone() };
        let merged = merge_recalled(vec![a.clone()], vec![b, c], 10);
        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].content, "user-biased");
    }
}
