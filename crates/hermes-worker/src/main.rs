mod chat_source;
mod recovery;

use std::sync::Arc;

use hermes_core::types::SETTING_YOUTUBE_URL;
use hermes_core::HermesConfig;
use hermes_etl::{HttpWordProposalClient, NullWordProposalClient, Scheduler, WordProposalClient};
use hermes_ingest::extract_video_id_from_url;
use hermes_stats::YoutubeStatsClient;
use hermes_store::Store;
use hermes_supervisor::Supervisor;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use chat_source::UnconfiguredChatSource;

/// `rusqlite::Connection::open` takes a bare filesystem path; strip the
/// `sqlite://` scheme prefix the original worker's `DATABASE_URL` carried
/// (`config.py` handed it straight to SQLAlchemy, which accepts the scheme)
/// so operators can reuse the same value here unchanged.
fn sqlite_path(database_url: &str) -> &str {
    database_url
        .strip_prefix("sqlite:///")
        .map(|_| database_url.trim_start_matches("sqlite://"))
        .unwrap_or(database_url)
}

/// Resolve the broadcast to watch at startup (spec §6.1 Open Question):
/// `setting[youtube_url]` in the database wins over the `YOUTUBE_URL`
/// environment variable when both are present, since the DB value is what
/// an operator or admin tool changed most recently; `YOUTUBE_URL` only seeds
/// a fresh database.
fn resolve_startup_url(store: &Store, config: &HermesConfig) -> hermes_core::Result<Option<String>> {
    if let Some(db_url) = store.get_setting(SETTING_YOUTUBE_URL)? {
        return Ok(Some(db_url));
    }
    if let Some(env_url) = &config.youtube_url {
        store.put_setting(SETTING_YOUTUBE_URL, env_url, Some("seeded from YOUTUBE_URL at startup"))?;
        return Ok(Some(env_url.clone()));
    }
    Ok(None)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = HermesConfig::load(None)?;

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(&config.log_level))
        .init();

    if let Err(e) = config.validate() {
        error!(error = %e, "configuration invalid, aborting startup");
        return Err(e.into());
    }
    info!(config = %config.redacted_summary(), "hermes-worker starting");

    let database_url = config.database_url.as_deref().expect("validated above");
    let store = Arc::new(Store::open(sqlite_path(database_url))?);

    if config.enable_backfill {
        match recovery::recover_backup_dir(&store, &config.data_dir) {
            Ok((files, messages)) => {
                if files > 0 {
                    info!(files, messages, "recovered crash backlog from on-disk backup files");
                }
            }
            Err(e) => warn!(error = %e, "backlog recovery failed, continuing startup"),
        }
    }

    let shutdown = CancellationToken::new();
    spawn_signal_handler(shutdown.clone());

    let word_proposal_client: Arc<dyn WordProposalClient> = match &config.word_proposal_endpoint {
        Some(endpoint) => Arc::new(HttpWordProposalClient::new(endpoint.clone())?),
        None => Arc::new(NullWordProposalClient),
    };
    let scheduler = Arc::new(Scheduler::new(store.clone(), word_proposal_client));
    let scheduler_task = tokio::spawn(scheduler.run(shutdown.clone()));

    let startup_url = resolve_startup_url(&store, &config)?;
    match startup_url {
        Some(url) => {
            let Some(video_id) = extract_video_id_from_url(&url) else {
                error!(url = %url, "configured youtube_url does not contain a recognizable video id");
                shutdown.cancel();
                let _ = scheduler_task.await;
                return Err(anyhow::anyhow!("unparseable youtube_url at startup"));
            };

            let stats_client = Arc::new(YoutubeStatsClient::new()?);
            let source_factory: Arc<dyn Fn() -> Box<dyn hermes_ingest::ChatSource> + Send + Sync> =
                Arc::new(|| Box::new(UnconfiguredChatSource) as Box<dyn hermes_ingest::ChatSource>);
            let supervisor = Arc::new(Supervisor::new(store.clone(), config.clone(), source_factory, stats_client));

            if let Err(e) = supervisor.run(video_id, url, shutdown.clone()).await {
                error!(error = %e, "supervisor exited with an error");
            }
        }
        None => {
            warn!("no youtube_url configured (env or setting); idling until shutdown with only the ETL scheduler running");
            shutdown.cancelled().await;
        }
    }

    let _ = scheduler_task.await;
    info!("hermes-worker shut down cleanly");
    Ok(())
}

/// SIGINT/SIGTERM both trigger graceful shutdown (spec §4.4, mirroring
/// `chat_collector.py`'s signal handlers for the same two signals).
fn spawn_signal_handler(shutdown: CancellationToken) {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    error!(error = %e, "failed to install SIGTERM handler");
                    return;
                }
            };
            tokio::select! {
                _ = tokio::signal::ctrl_c() => info!("received SIGINT, shutting down"),
                _ = sigterm.recv() => info!("received SIGTERM, shutting down"),
            }
        }
        #[cfg(not(unix))]
        {
            let _ = tokio::signal::ctrl_c().await;
            info!("received ctrl-c, shutting down");
        }
        shutdown.cancel();
    });
}
