use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hermes_core::config::{FLUSH_INTERVAL_SECS, FLUSH_SIZE};
use hermes_core::types::{ChatMessage, RawChatMessage};
use hermes_core::{HermesError, Result};
use hermes_store::Store;

use crate::backup;
use crate::source::ChatSource;

/// Ingestor lifecycle (spec §4.2, §5): `Idle` before `run`, `Running` while
/// draining the source, `Flushing` while a taken buffer is being persisted,
/// back to `Running` once the flush resolves; `Stopping` once cancellation
/// is observed and the source thread is being joined, then back to `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestorState {
    Idle,
    Running,
    Flushing,
    Stopping,
}

/// Liveness heartbeat the supervisor's chat watchdog polls (spec §4.4).
#[derive(Clone)]
pub struct Heartbeat(Arc<AtomicI64>);

impl Heartbeat {
    pub fn new() -> Self {
        Self(Arc::new(AtomicI64::new(Utc::now().timestamp_millis())))
    }

    fn touch(&self) {
        self.0.store(Utc::now().timestamp_millis(), Ordering::Relaxed);
    }

    /// Milliseconds elapsed since the last observed message (or construction).
    pub fn idle_for_millis(&self) -> i64 {
        Utc::now().timestamp_millis() - self.0.load(Ordering::Relaxed)
    }
}

impl Default for Heartbeat {
    fn default() -> Self {
        Self::new()
    }
}

pub struct ChatIngestor {
    store: Arc<Store>,
    data_dir: String,
    retry_max_attempts: u32,
    retry_backoff_seconds: u64,
    heartbeat: Heartbeat,
    state: Arc<Mutex<IngestorState>>,
}

impl ChatIngestor {
    pub fn new(
        store: Arc<Store>,
        data_dir: String,
        retry_max_attempts: u32,
        retry_backoff_seconds: u64,
    ) -> Self {
        Self {
            store,
            data_dir,
            retry_max_attempts,
            retry_backoff_seconds,
            heartbeat: Heartbeat::new(),
            state: Arc::new(Mutex::new(IngestorState::Idle)),
        }
    }

    pub fn heartbeat(&self) -> Heartbeat {
        self.heartbeat.clone()
    }

    pub fn state(&self) -> IngestorState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: IngestorState) {
        *self.state.lock().unwrap() = state;
    }

    /// Drive `source` for `video_id`/`url` until it ends or `cancel` fires.
    /// Buffers and flushes per spec §4.2; retries source failures internally
    /// (`backoff_seconds * 2^attempt`, capped at `retry_max_attempts`) before
    /// surfacing the error to the supervisor's own restart-with-backoff loop
    /// (spec.md §4.4 algorithm 1 — the two backoff layers are distinct).
    pub async fn run(
        &self,
        video_id: String,
        url: String,
        source: Box<dyn ChatSource>,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.set_state(IngestorState::Running);
        let mut source = Some(source);
        let mut attempt = 0u32;

        let outcome = loop {
            let (returned_source, run_result) =
                self.run_once(&video_id, &url, source.take().expect("source present"), cancel.clone()).await;

            match run_result {
                Ok(()) => break Ok(()),
                Err(_) if cancel.is_cancelled() => {
                    self.set_state(IngestorState::Idle);
                    return Ok(());
                }
                Err(e) if returned_source.is_none() || attempt + 1 >= self.retry_max_attempts => {
                    error!(video_id = %video_id, attempt, error = %e, "chat source exhausted retries");
                    break Err(e);
                }
                Err(e) => {
                    let wait = self.retry_backoff_seconds * 2u64.pow(attempt);
                    warn!(video_id = %video_id, attempt, error = %e, wait_secs = wait, "chat source failed, retrying");
                    source = returned_source;
                    tokio::time::sleep(StdDuration::from_secs(wait)).await;
                    attempt += 1;
                    continue;
                }
            };
        };

        self.set_state(IngestorState::Idle);
        outcome
    }

    /// Run the source once to completion (or cancellation), draining its
    /// output into flush cycles. Returns the source back (so a retry can
    /// reuse it) alongside the run result — `None` only if the blocking
    /// thread itself panicked, in which case the source is gone.
    async fn run_once(
        &self,
        video_id: &str,
        url: &str,
        mut source: Box<dyn ChatSource>,
        cancel: CancellationToken,
    ) -> (Option<Box<dyn ChatSource>>, Result<()>) {
        let (tx, mut rx) = mpsc::channel::<RawChatMessage>(FLUSH_SIZE * 2);
        let cancel_for_thread = cancel.clone();
        let url_owned = url.to_string();

        let blocking = tokio::task::spawn_blocking(move || {
            let is_cancelled = move || cancel_for_thread.is_cancelled();
            let mut on_message = move |msg: RawChatMessage| {
                let _ = tx.blocking_send(msg);
            };
            let result = source.run(&url_owned, &is_cancelled, &mut on_message);
            (source, result)
        });

        let drain_result = self.drain_and_flush(video_id, &mut rx, &cancel).await;

        let (returned_source, source_result) = match blocking.await {
            Ok((source, result)) => (Some(source), result),
            Err(join_err) => (
                None,
                Err(HermesError::ChatSource(format!(
                    "source thread panicked: {join_err}"
                ))),
            ),
        };

        let result = source_result.and(drain_result);
        (returned_source, result)
    }

    async fn drain_and_flush(
        &self,
        video_id: &str,
        rx: &mut mpsc::Receiver<RawChatMessage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut buffer: Vec<RawChatMessage> = Vec::with_capacity(FLUSH_SIZE);
        let mut interval = tokio::time::interval(StdDuration::from_secs(FLUSH_INTERVAL_SECS));
        interval.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    self.set_state(IngestorState::Stopping);
                    if !buffer.is_empty() {
                        self.flush(video_id, mem::take(&mut buffer)).await?;
                    }
                    return Ok(());
                }

                maybe_msg = rx.recv() => {
                    match maybe_msg {
                        Some(msg) => {
                            self.heartbeat.touch();
                            buffer.push(msg);
                            if buffer.len() >= FLUSH_SIZE {
                                self.flush(video_id, mem::take(&mut buffer)).await?;
                            }
                        }
                        None => {
                            // Source ended (or panicked before any send).
                            if !buffer.is_empty() {
                                self.flush(video_id, mem::take(&mut buffer)).await?;
                            }
                            return Ok(());
                        }
                    }
                }

                _ = interval.tick() => {
                    if !buffer.is_empty() {
                        self.flush(video_id, mem::take(&mut buffer)).await?;
                    }
                }
            }
        }
    }

    /// Take-and-persist one buffer (spec §4.2): write a crash-backup file,
    /// batch-upsert, then delete the file on full success or rewrite it with
    /// only the still-failed messages on partial failure.
    async fn flush(&self, video_id: &str, raw_messages: Vec<RawChatMessage>) -> Result<()> {
        self.set_state(IngestorState::Flushing);
        let result = self.flush_inner(video_id, raw_messages).await;
        self.set_state(IngestorState::Running);
        result
    }

    async fn flush_inner(&self, video_id: &str, raw_messages: Vec<RawChatMessage>) -> Result<()> {
        let data_dir = self.data_dir.clone();
        let video_id_owned = video_id.to_string();
        let raw_for_backup = raw_messages.clone();

        let backup_path: PathBuf = tokio::task::spawn_blocking(move || {
            backup::write_backup(&data_dir, &video_id_owned, &raw_for_backup)
        })
        .await
        .map_err(|e| HermesError::Internal(e.to_string()))??;

        let messages: Vec<ChatMessage> = raw_messages
            .into_iter()
            .map(|raw| ChatMessage::from_raw(raw, video_id))
            .collect();
        let still_failed_raw: Vec<RawChatMessage>;

        {
            let store = self.store.clone();
            let messages_for_store = messages.clone();
            let batch_result = tokio::task::spawn_blocking(move || store.batch_upsert_chat(&messages_for_store))
                .await
                .map_err(|e| HermesError::Internal(e.to_string()))??;

            info!(
                video_id = %video_id,
                inserted = batch_result.inserted,
                duplicates = batch_result.duplicates,
                errors = batch_result.errors.len(),
                "flushed chat buffer"
            );

            if batch_result.errors.is_empty() {
                let path = backup_path.clone();
                tokio::task::spawn_blocking(move || backup::delete_backup(&path))
                    .await
                    .map_err(|e| HermesError::Internal(e.to_string()))??;
                return Ok(());
            }

            let failed_ids: std::collections::HashSet<&str> =
                batch_result.errors.iter().map(|(id, _)| id.as_str()).collect();
            still_failed_raw = messages
                .iter()
                .filter(|m| failed_ids.contains(m.message_id.as_str()))
                .map(raw_from_chat_message)
                .collect();
        }

        let path = backup_path.clone();
        tokio::task::spawn_blocking(move || backup::rewrite_backup(&path, &still_failed_raw))
            .await
            .map_err(|e| HermesError::Internal(e.to_string()))??;
        Ok(())
    }
}

/// Reconstruct the wire shape from a persisted row for backup rewriting —
/// the backup file format is the iterator's wire shape, not the stored row.
fn raw_from_chat_message(msg: &ChatMessage) -> RawChatMessage {
    RawChatMessage {
        message_id: msg.message_id.clone(),
        message: msg.message.clone(),
        timestamp: msg.timestamp,
        time_text: msg.time_text.clone(),
        author_id: msg.author_id.clone(),
        author_name: msg.author_name.clone(),
        message_type: msg.message_type.as_str().to_string(),
        emotes: msg.emotes.clone(),
        money: msg.raw_data.money.clone(),
        badges: msg.raw_data.badges.clone(),
        extra: msg.raw_data.extra.clone(),
    }
}
