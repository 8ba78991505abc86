use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use hermes_core::config::{DISCOVERY_CADENCE_SECS, NORMALIZATION_CADENCE_SECS};
use hermes_core::types::{truncate_error_message, JobId, JobStatus};
use hermes_core::{HermesError, Result};
use hermes_store::Store;

use crate::discovery::WordProposalClient;
use crate::jobs;

/// Runs `process_chat_messages` hourly and `discover_new_words` every three
/// hours (spec §4.5). `import_dicts` is a manual job, invoked directly from
/// the `hermes-import` CLI rather than on a cadence, so it has no loop here.
///
/// Two different jobs may overlap; two runs of the *same* job must not
/// (spec §5) — each job has its own coalescing lock, held for the duration
/// of the run. Because each job also owns a single ticking loop, the only
/// way two runs could otherwise overlap is a previous run outliving its own
/// tick interval; the `try_lock` below turns that into a skipped tick
/// (logged) rather than a queued pile-up.
pub struct Scheduler {
    store: Arc<Store>,
    word_proposal_client: Arc<dyn WordProposalClient>,
    normalization_lock: Arc<AsyncMutex<()>>,
    discovery_lock: Arc<AsyncMutex<()>>,
}

impl Scheduler {
    pub fn new(store: Arc<Store>, word_proposal_client: Arc<dyn WordProposalClient>) -> Self {
        Self {
            store,
            word_proposal_client,
            normalization_lock: Arc::new(AsyncMutex::new(())),
            discovery_lock: Arc::new(AsyncMutex::new(())),
        }
    }

    /// Drive both cadences until `shutdown` fires.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        let normalization = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.run_normalization_loop(shutdown).await })
        };
        let discovery = {
            let this = self.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { this.run_discovery_loop(shutdown).await })
        };

        let _ = tokio::join!(normalization, discovery);
    }

    async fn run_normalization_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(NORMALIZATION_CADENCE_SECS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => self.run_normalization_once().await,
            }
        }
    }

    async fn run_discovery_loop(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(DISCOVERY_CADENCE_SECS));
        loop {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => self.run_discovery_once().await,
            }
        }
    }

    async fn run_normalization_once(&self) {
        let Ok(_guard) = self.normalization_lock.clone().try_lock_owned() else {
            warn!(job = %JobId::ProcessChatMessages, "previous run still in progress, skipping this tick");
            return;
        };
        let store = self.store.clone();
        run_guarded(self.store.clone(), JobId::ProcessChatMessages, async move {
            tokio::task::spawn_blocking(move || jobs::process_chat_messages(&store))
                .await
                .map_err(|e| HermesError::Internal(e.to_string()))?
        })
        .await;
    }

    async fn run_discovery_once(&self) {
        let Ok(_guard) = self.discovery_lock.clone().try_lock_owned() else {
            warn!(job = %JobId::DiscoverNewWords, "previous run still in progress, skipping this tick");
            return;
        };
        let store = self.store.clone();
        let client = self.word_proposal_client.clone();
        run_guarded(self.store.clone(), JobId::DiscoverNewWords, async move {
            jobs::discover_new_words(&store, client.as_ref()).await
        })
        .await;
    }
}

/// Run one job to completion, recording an [`hermes_core::types::EtlExecutionLog`]
/// row around it (spec §4.5, §7): a caught error becomes a `failed` row with
/// its (truncated) message; the scheduler loop itself is never interrupted.
pub async fn run_guarded<F>(store: Arc<Store>, job_id: JobId, job: F)
where
    F: std::future::Future<Output = Result<(usize, serde_json::Value)>>,
{
    let started_at = Utc::now();
    let log_store = store.clone();
    let log_id = match tokio::task::spawn_blocking(move || log_store.start_execution(job_id.as_str(), started_at)).await {
        Ok(Ok(id)) => id,
        Ok(Err(e)) => {
            error!(job = %job_id, error = %e, "failed to write execution-log start row");
            return;
        }
        Err(e) => {
            error!(job = %job_id, error = %e, "execution-log start task panicked");
            return;
        }
    };

    info!(job = %job_id, "starting scheduled job");
    let result = job.await;
    let completed_at = Utc::now();

    let (status, records, error_message, metadata) = match result {
        Ok((records, metadata)) => (JobStatus::Completed, records as i64, None, metadata),
        Err(e) => {
            warn!(job = %job_id, error = %e, "job failed");
            (JobStatus::Failed, 0, Some(truncate_error_message(&e.to_string())), serde_json::Value::Null)
        }
    };

    let finish_store = store.clone();
    let status_str = status.as_str();
    let finish_result = tokio::task::spawn_blocking(move || {
        finish_store.finish_execution(log_id, completed_at, status_str, records, error_message.as_deref(), &metadata)
    })
    .await;

    match finish_result {
        Ok(Ok(())) => info!(job = %job_id, status = status.as_str(), records, "job finished"),
        Ok(Err(e)) => error!(job = %job_id, error = %e, "failed to write execution-log finish row"),
        Err(e) => error!(job = %job_id, error = %e, "execution-log finish task panicked"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn run_guarded_records_success() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        run_guarded(store.clone(), JobId::ImportDicts, async { Ok((3, serde_json::json!({"ok": true}))) }).await;

        let log = store.recent_executions(JobId::ImportDicts.as_str(), 1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "completed");
        assert_eq!(log[0].records_processed, 3);
    }

    #[tokio::test]
    async fn run_guarded_records_failure_with_truncated_message() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let long_message = "x".repeat(1000);
        run_guarded(store.clone(), JobId::ImportDicts, async move {
            Err(HermesError::Internal(long_message))
        })
        .await;

        let log = store.recent_executions(JobId::ImportDicts.as_str(), 1).unwrap();
        assert_eq!(log.len(), 1);
        assert_eq!(log[0].status, "failed");
        assert_eq!(log[0].error_message.as_ref().unwrap().chars().count(), 500);
    }
}
