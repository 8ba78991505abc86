use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use hermes_core::config::{RESTART_DELAY_ERROR_SECS, RESTART_DELAY_NORMAL_SECS, WATCHDOG_RESTART_PAUSE_MILLIS};
use hermes_core::types::SETTING_YOUTUBE_URL;
use hermes_core::{HermesConfig, Result};
use hermes_ingest::{extract_video_id_from_url, ChatIngestor, ChatSource, Heartbeat};
use hermes_stats::{StatsClient, StatsPoller};
use hermes_store::Store;

type SourceFactory = dyn Fn() -> Box<dyn ChatSource> + Send + Sync;

/// The live pair of workers bound to one video id, plus what's needed to
/// stop them (spec §4.4: "ownership, not references" — the Supervisor is
/// the sole owner of these handles). C2 and C3 carry independent
/// cancellation tokens so the watchdog can stop/replace the ingestor alone
/// — "the watchdog never touches C3" (spec §4.4 algorithm 3).
struct WorkerSet {
    video_id: String,
    url: String,
    cancel_c2: CancellationToken,
    cancel_c3: CancellationToken,
    heartbeat: Heartbeat,
    c2: JoinHandle<()>,
    c3: JoinHandle<()>,
}

/// Owns C2 (chat ingestor) and C3 (stats poller) as supervised peers, plus
/// the URL-change monitor and chat watchdog that restart them (spec §4.4).
/// Modeled on `ChannelManager`'s backoff-guarded connect loop, generalized
/// from a one-shot connect to an indefinite restart loop.
pub struct Supervisor<C: StatsClient + 'static> {
    store: Arc<Store>,
    config: HermesConfig,
    source_factory: Arc<SourceFactory>,
    stats_client: Arc<C>,
    current: AsyncMutex<Option<WorkerSet>>,
    /// Serializes restarts triggered by the URL monitor and the watchdog
    /// (spec §4.4 Design Note "Restart safety").
    restart_lock: AsyncMutex<()>,
    last_seen_url: AsyncMutex<Option<String>>,
}

impl<C: StatsClient + 'static> Supervisor<C> {
    pub fn new(
        store: Arc<Store>,
        config: HermesConfig,
        source_factory: Arc<SourceFactory>,
        stats_client: Arc<C>,
    ) -> Self {
        Self {
            store,
            config,
            source_factory,
            stats_client,
            current: AsyncMutex::new(None),
            restart_lock: AsyncMutex::new(()),
            last_seen_url: AsyncMutex::new(None),
        }
    }

    /// Start the worker pair for `video_id`/`url`, the URL monitor, and the
    /// chat watchdog; run until `shutdown` fires, then stop everything.
    pub async fn run(self: Arc<Self>, video_id: String, url: String, shutdown: CancellationToken) -> Result<()> {
        info!(config = %self.config.redacted_summary(), "supervisor starting with effective configuration");

        *self.last_seen_url.lock().await = Some(url.clone());
        self.spawn_workers(video_id, url).await;

        let url_monitor = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.run_url_monitor(shutdown).await })
        };
        let watchdog = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.run_chat_watchdog(shutdown).await })
        };

        shutdown.cancelled().await;
        info!("supervisor received shutdown signal, stopping workers");

        let _ = tokio::time::timeout(Duration::from_secs(10), url_monitor).await;
        let _ = tokio::time::timeout(Duration::from_secs(10), watchdog).await;
        self.stop_current().await;

        Ok(())
    }

    /// Build and spawn a fresh chat ingestor bound to `video_id`/`url`,
    /// returning its cancellation token, its *real* heartbeat (spec §4.4:
    /// the watchdog must observe the ingestor's own heartbeat, not a
    /// disconnected stand-in), and its join handle.
    fn spawn_chat_ingestor(&self, video_id: String, url: String) -> (CancellationToken, Heartbeat, JoinHandle<()>) {
        let cancel = CancellationToken::new();
        let ingestor = Arc::new(ChatIngestor::new(
            self.store.clone(),
            self.config.data_dir.clone(),
            self.config.retry_max_attempts,
            self.config.retry_backoff_seconds,
        ));
        let heartbeat = ingestor.heartbeat();
        let c2 = spawn_chat_worker(ingestor, video_id, url, self.source_factory.clone(), cancel.clone());
        (cancel, heartbeat, c2)
    }

    async fn spawn_workers(&self, video_id: String, url: String) {
        let (cancel_c2, heartbeat, c2) = self.spawn_chat_ingestor(video_id.clone(), url.clone());

        let cancel_c3 = CancellationToken::new();
        let poller = Arc::new(StatsPoller::new(
            ClonedClient(self.stats_client.clone()),
            self.store.clone(),
            self.config.youtube_api_key.clone().unwrap_or_default(),
        ));
        let c3 = spawn_stats_worker(poller, video_id.clone(), self.config.poll_interval, cancel_c3.clone());

        *self.current.lock().await = Some(WorkerSet {
            video_id,
            url,
            cancel_c2,
            cancel_c3,
            heartbeat,
            c2,
            c3,
        });
    }

    /// Stop and drop both C2 and C3 (URL hot-swap, shutdown).
    async fn stop_current(&self) {
        let mut guard = self.current.lock().await;
        if let Some(workers) = guard.take() {
            workers.cancel_c2.cancel();
            workers.cancel_c3.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(10), workers.c2).await;
            let _ = tokio::time::timeout(Duration::from_secs(10), workers.c3).await;
        }
    }

    /// Algorithm 2 (spec §4.4): poll `setting[youtube_url]` every
    /// `url_check_interval` seconds; on a real change, extract the new
    /// video id and hot-swap both workers under the restart lock.
    async fn run_url_monitor(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.url_check_interval));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.check_url_change().await {
                        warn!(error = %e, "url monitor tick failed");
                    }
                }
            }
        }
    }

    async fn check_url_change(&self) -> Result<()> {
        let store = self.store.clone();
        let setting = tokio::task::spawn_blocking(move || store.get_setting(SETTING_YOUTUBE_URL))
            .await
            .map_err(|e| hermes_core::HermesError::Internal(e.to_string()))??;

        let Some(new_url) = setting else { return Ok(()) };

        let mut last_seen = self.last_seen_url.lock().await;
        if last_seen.as_deref() == Some(new_url.as_str()) {
            return Ok(());
        }

        let Some(video_id) = extract_video_id_from_url(&new_url) else {
            warn!(url = %new_url, "new youtube_url did not yield a recognizable video id, ignoring");
            return Ok(());
        };

        info!(old = ?*last_seen, new = %new_url, video_id = %video_id, "youtube_url changed, restarting workers");
        *last_seen = Some(new_url.clone());
        drop(last_seen);

        let _permit = self.restart_lock.lock().await;
        self.stop_current().await;
        self.spawn_workers(video_id, new_url).await;
        Ok(())
    }

    /// Algorithm 3 (spec §4.4): if C2's heartbeat has not advanced for more
    /// than `chat_watchdog_timeout`, restart C2 only. C3 is left untouched.
    async fn run_chat_watchdog(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.config.chat_watchdog_check_interval));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => self.check_chat_stall().await,
            }
        }
    }

    async fn check_chat_stall(&self) {
        let timeout_millis = (self.config.chat_watchdog_timeout as i64) * 1000;
        let stalled_video = {
            let guard = self.current.lock().await;
            guard.as_ref().and_then(|w| {
                if w.heartbeat.idle_for_millis() > timeout_millis {
                    Some((w.video_id.clone(), w.url.clone()))
                } else {
                    None
                }
            })
        };

        let Some((video_id, url)) = stalled_video else { return };
        warn!(video_id = %video_id, "chat heartbeat stalled past watchdog timeout, restarting ingestor");

        let _permit = self.restart_lock.lock().await;
        self.restart_chat_ingestor_only(video_id, url).await;
    }

    /// Restart C2 alone, leaving C3 running untouched (spec §4.4 algorithm
    /// 3: "stop C2 … The watchdog never touches C3"). Stops the stalled
    /// ingestor, pauses briefly, then constructs a fresh one and swaps it
    /// into the current `WorkerSet` in place.
    async fn restart_chat_ingestor_only(&self, video_id: String, url: String) {
        let old_c2 = {
            let mut guard = self.current.lock().await;
            match guard.as_mut() {
                Some(workers) if workers.video_id == video_id => {
                    workers.cancel_c2.cancel();
                    Some(std::mem::replace(&mut workers.c2, tokio::spawn(async {})))
                }
                _ => None,
            }
        };
        let Some(old_c2) = old_c2 else { return };
        let _ = tokio::time::timeout(Duration::from_secs(10), old_c2).await;

        tokio::time::sleep(Duration::from_millis(WATCHDOG_RESTART_PAUSE_MILLIS)).await;

        let (cancel_c2, heartbeat, c2) = self.spawn_chat_ingestor(video_id, url);
        let mut guard = self.current.lock().await;
        if let Some(workers) = guard.as_mut() {
            workers.cancel_c2 = cancel_c2;
            workers.heartbeat = heartbeat;
            workers.c2 = c2;
        }
    }
}

fn spawn_chat_worker(
    ingestor: Arc<ChatIngestor>,
    video_id: String,
    url: String,
    source_factory: Arc<SourceFactory>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            let source = source_factory();
            let result = ingestor.run(video_id.clone(), url.clone(), source, cancel.clone()).await;
            if cancel.is_cancelled() {
                return;
            }
            match result {
                Ok(()) => {
                    info!(video_id = %video_id, "chat ingestor completed normally, restarting in {}s", RESTART_DELAY_NORMAL_SECS);
                    tokio::time::sleep(Duration::from_secs(RESTART_DELAY_NORMAL_SECS)).await;
                }
                Err(e) => {
                    warn!(video_id = %video_id, error = %e, "chat ingestor failed, restarting in {}s", RESTART_DELAY_ERROR_SECS);
                    tokio::time::sleep(Duration::from_secs(RESTART_DELAY_ERROR_SECS)).await;
                }
            }
        }
    })
}

fn spawn_stats_worker<C: StatsClient + 'static>(
    poller: Arc<StatsPoller<ClonedClient<C>>>,
    video_id: String,
    poll_interval: u64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if cancel.is_cancelled() {
                return;
            }
            poller.run(&video_id, poll_interval, &cancel).await;
            if cancel.is_cancelled() {
                return;
            }
            info!(video_id = %video_id, "stats poller completed normally, restarting in {}s", RESTART_DELAY_NORMAL_SECS);
            tokio::time::sleep(Duration::from_secs(RESTART_DELAY_NORMAL_SECS)).await;
        }
    })
}

/// `StatsPoller` owns its client by value; this thin wrapper lets the
/// supervisor share one `Arc<dyn StatsClient>`-like client across restarts
/// without cloning the underlying HTTP client itself.
struct ClonedClient<C: StatsClient>(Arc<C>);

#[async_trait::async_trait]
impl<C: StatsClient> StatsClient for ClonedClient<C> {
    async fn fetch(&self, video_id: &str, api_key: &str) -> Result<Option<hermes_stats::VideoSnapshot>> {
        self.0.fetch(video_id, api_key).await
    }
}
