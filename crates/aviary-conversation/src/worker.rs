//! The per-channel worker: a single task that owns one channel's mailbox,
//! coalesces bursts, drives the turn cycle, and exits on idle or shutdown.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use aviary_core::config::{
    MemoryConfig, RuntimeConfig, DRAIN_DEADLINE_SECS, TYPING_REFRESH_SECS, WEB_SEARCH_CHANNEL_CAPACITY,
    WORKER_MAILBOX_CAPACITY,
};
use aviary_core::types::{ChannelId, HistoryEntry, InboundMessage, ResponseMode};
use aviary_llm::{ChatClient, EmbeddingClient};
use aviary_memory::MemoryStore;
use aviary_tools::SearchDelivery;

use crate::addressee::is_directly_addressed;
use crate::coalesce::CoalesceWindow;
use crate::gateway::{ChannelGateway, GatewayAdapter};
use crate::history::build_backfill_history;
use crate::message_build::MediaDownloader;
use crate::turn::{process_search_delivery_turn, process_turn, TurnContext};

/// Everything a worker needs for its whole lifetime — stable tenant/channel
/// wiring the router assembles once at spawn time.
pub struct WorkerConfig {
    pub store: Arc<MemoryStore>,
    pub embeddings: Arc<dyn EmbeddingClient>,
    pub chat: Arc<dyn ChatClient>,
    pub adapter: Arc<dyn GatewayAdapter>,
    pub server_id: String,
    pub channel_id: ChannelId,
    pub personality: String,
    pub language: Option<String>,
    pub response_mode: ResponseMode,
    pub runtime: RuntimeConfig,
    pub memory: MemoryConfig,
    pub web_timeout: Duration,
    pub video_cap_bytes: u64,
}

pub struct ChannelAgentHandle {
    pub mailbox: mpsc::Sender<InboundMessage>,
    pub task: tokio::task::JoinHandle<()>,
}

/// Spawn a worker task and return a handle to its mailbox and join handle.
/// The router inserts the mailbox into its channel map; the task itself
/// watches `shutdown` to begin its own drain-and-exit sequence.
pub fn spawn(config: WorkerConfig, shutdown: CancellationToken) -> ChannelAgentHandle {
    let (tx, rx) = mpsc::channel(WORKER_MAILBOX_CAPACITY);
    let task = tokio::spawn(run(config, rx, shutdown));
    ChannelAgentHandle { mailbox: tx, task }
}

async fn run(config: WorkerConfig, mut mailbox: mpsc::Receiver<InboundMessage>, shutdown: CancellationToken) {
    let (search_tx, mut search_rx) = mpsc::channel::<SearchDelivery>(WEB_SEARCH_CHANNEL_CAPACITY);
    let media = MediaDownloader::new(config.video_cap_bytes);
    let search_running = Arc::new(AtomicBool::new(false));

    let mut history: Vec<HistoryEntry> = Vec::new();
    let mut turn_count: u64 = 0;
    let mut backfilled = false;
    let idle_timeout = Duration::from_secs(config.runtime.idle_timeout_minutes * 60);

    loop {
        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {
                drain_buffered(&config, &media, &search_running, &search_tx, &mut mailbox, &mut search_rx, &mut history, &mut turn_count).await;
                return;
            }
            maybe_msg = mailbox.recv() => {
                let Some(first_msg) = maybe_msg else { return };

                if !backfilled {
                    backfilled = true;
                    if config.runtime.history_backfill_limit > 0 {
                        match config.adapter.fetch_history(&config.channel_id, config.runtime.history_backfill_limit).await {
                            Ok(raw) => history = build_backfill_history(raw, config.runtime.history_limit),
                            Err(e) => warn!(error = %e, "history backfill fetch failed"),
                        }
                    }
                }

                let batch = collect_batch(&config, first_msg, &mut mailbox).await;
                run_one_turn(&config, &media, &search_running, &search_tx, &mut search_rx, &mut history, &mut turn_count, batch).await;
            }
            maybe_delivery = search_rx.recv() => {
                let Some(first) = maybe_delivery else { continue };
                let mut pending = vec![first];
                while let Ok(next) = search_rx.try_recv() {
                    pending.push(next);
                }
                run_search_only_turn(&config, &search_running, &search_tx, &mut history, &mut turn_count, pending).await;
            }
            _ = tokio::time::sleep(idle_timeout) => {
                info!(channel_id = %config.channel_id, "worker idle timeout, exiting");
                return;
            }
        }
    }
}

/// A `web_search` result arrived with no new inbound message to piggyback
/// on — run a turn for it directly rather than waiting for the next
/// mailbox message, which may never come (per §4.3, the worker wakes on
/// either the mailbox or the internal delivery channel).
async fn run_search_only_turn(
    config: &WorkerConfig,
    search_running: &Arc<AtomicBool>,
    search_tx: &mpsc::Sender<SearchDelivery>,
    history: &mut Vec<HistoryEntry>,
    turn_count: &mut u64,
    pending_search: Vec<SearchDelivery>,
) {
    if config.response_mode == ResponseMode::None {
        return;
    }

    let gateway = Arc::new(ChannelGateway {
        adapter: Arc::clone(&config.adapter),
        channel_id: config.channel_id.clone(),
        trigger_message_id: String::new(),
    });

    let turn_ctx = TurnContext {
        store: Arc::clone(&config.store),
        embeddings: Arc::clone(&config.embeddings),
        chat: Arc::clone(&config.chat),
        gateway,
        server_id: config.server_id.clone(),
        channel_id: config.channel_id.to_string(),
        personality: config.personality.clone(),
        language: config.language.clone(),
        response_mode: config.response_mode,
        runtime: config.runtime.clone(),
        memory: config.memory.clone(),
        web_timeout: config.web_timeout,
        search_running: Arc::clone(search_running),
        search_delivery: search_tx.clone(),
    };

    process_search_delivery_turn(&turn_ctx, history, turn_count, pending_search).await;
}

/// Pull the first message plus anything else that arrives inside the
/// debounce/max-wait window, forming one coalesced batch.
async fn collect_batch(
    config: &WorkerConfig,
    first: InboundMessage,
    mailbox: &mut mpsc::Receiver<InboundMessage>,
) -> Vec<InboundMessage> {
    let mut batch = vec![first];
    if config.runtime.coalesce_disabled {
        return batch;
    }

    let window = CoalesceWindow::new(config.runtime.coalesce_debounce_ms, config.runtime.coalesce_max_wait_ms);
    let batch_start = Instant::now();
    loop {
        let Some(wait) = window.next_wait(batch_start.elapsed()) else { break };
        match tokio::time::timeout(wait, mailbox.recv()).await {
            Ok(Some(next)) => batch.push(next),
            Ok(None) | Err(_) => break,
        }
    }
    batch
}

#[allow(clippy::too_many_arguments)]
async fn run_one_turn(
    config: &WorkerConfig,
    media: &MediaDownloader,
    search_running: &Arc<AtomicBool>,
    search_tx: &mpsc::Sender<SearchDelivery>,
    search_rx: &mut mpsc::Receiver<SearchDelivery>,
    history: &mut Vec<HistoryEntry>,
    turn_count: &mut u64,
    batch: Vec<InboundMessage>,
) {
    if config.response_mode == ResponseMode::None {
        return;
    }
    let Some(last) = batch.last() else { return };
    let addressed = is_directly_addressed(last, config.adapter.bot_user_id(), config.adapter.bot_display_name());

    let typing_handle = if config.response_mode != ResponseMode::Smart || addressed {
        Some(spawn_typing_indicator(Arc::clone(&config.adapter), config.channel_id.clone()))
    } else {
        None
    };

    let mut pending_search = Vec::new();
    while let Ok(delivery) = search_rx.try_recv() {
        pending_search.push(delivery);
    }

    let gateway = Arc::new(ChannelGateway {
        adapter: Arc::clone(&config.adapter),
        channel_id: config.channel_id.clone(),
        trigger_message_id: last.message_id.clone(),
    });

    let turn_ctx = TurnContext {
        store: Arc::clone(&config.store),
        embeddings: Arc::clone(&config.embeddings),
        chat: Arc::clone(&config.chat),
        gateway,
        server_id: config.server_id.clone(),
        channel_id: config.channel_id.to_string(),
        personality: config.personality.clone(),
        language: config.language.clone(),
        response_mode: config.response_mode,
        runtime: config.runtime.clone(),
        memory: config.memory.clone(),
        web_timeout: config.web_timeout,
        search_running: Arc::clone(search_running),
        search_delivery: search_tx.clone(),
    };

    process_turn(&turn_ctx, media, history, turn_count, &batch, addressed, pending_search).await;

    if let Some(handle) = typing_handle {
        handle.abort();
    }
}

fn spawn_typing_indicator(adapter: Arc<dyn GatewayAdapter>, channel_id: ChannelId) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if let Err(e) = adapter.start_typing(&channel_id).await {
                warn!(error = %e, "typing indicator failed");
            }
            tokio::time::sleep(Duration::from_secs(TYPING_REFRESH_SECS)).await;
        }
    })
}

/// Drain whatever is already sitting in the mailbox — but never wait for
/// new arrivals — giving each message its own 30s deadline so a slow turn
/// can't swallow the rest of the drain.
#[allow(clippy::too_many_arguments)]
async fn drain_buffered(
    config: &WorkerConfig,
    media: &MediaDownloader,
    search_running: &Arc<AtomicBool>,
    search_tx: &mpsc::Sender<SearchDelivery>,
    mailbox: &mut mpsc::Receiver<InboundMessage>,
    search_rx: &mut mpsc::Receiver<SearchDelivery>,
    history: &mut Vec<HistoryEntry>,
    turn_count: &mut u64,
) {
    while let Ok(msg) = mailbox.try_recv() {
        let deadline = Duration::from_secs(DRAIN_DEADLINE_SECS);
        let turn = run_one_turn(config, media, search_running, search_tx, search_rx, history, turn_count, vec![msg]);
        if tokio::time::timeout(deadline, turn).await.is_err() {
            warn!(channel_id = %config.channel_id, "drain: turn exceeded its deadline, moving on");
        }
    }
}
