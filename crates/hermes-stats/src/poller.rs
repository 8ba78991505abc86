use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use hermes_core::types::{LiveStream, StreamStats};
use hermes_core::Result;
use hermes_store::Store;

use crate::client::{StatsClient, VideoSnapshot};

/// Polls the broadcast's stats endpoint on a fixed cadence (spec §4.3) and
/// writes the result through the [`Store`]. A missing `items` entry (e.g.
/// the stream ended) is logged and the tick is skipped, never an error —
/// matching spec.md's explicit boundary case.
pub struct StatsPoller<C: StatsClient> {
    client: C,
    store: Arc<Store>,
    api_key: String,
}

impl<C: StatsClient> StatsPoller<C> {
    pub fn new(client: C, store: Arc<Store>, api_key: String) -> Self {
        Self { client, store, api_key }
    }

    /// Poll every `poll_interval` seconds for `video_id` until `cancel` fires.
    pub async fn run(&self, video_id: &str, poll_interval: u64, cancel: &tokio_util::sync::CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_secs(poll_interval));
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                _ = interval.tick() => {
                    if let Err(e) = self.tick(video_id).await {
                        warn!(video_id, error = %e, "stats poll failed, skipping this tick");
                    }
                }
            }
        }
    }

    async fn tick(&self, video_id: &str) -> Result<()> {
        let snapshot = match self.client.fetch(video_id, &self.api_key).await? {
            Some(s) => s,
            None => {
                warn!(video_id, "no items in videos response, stream likely ended");
                return Ok(());
            }
        };

        let now = Utc::now();
        let live_stream = to_live_stream(&snapshot, now);
        let stats = to_stream_stats(&snapshot, now);

        let store = self.store.clone();
        let video_id_owned = video_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            store.upsert_live_stream(&live_stream)?;
            store.append_stats(&stats)?;
            debug!(video_id = %video_id_owned, "stats snapshot recorded");
            Ok(())
        })
        .await
        .map_err(|e| hermes_core::HermesError::Internal(e.to_string()))??;

        Ok(())
    }
}

fn parse_datetime(s: &Option<String>) -> Option<DateTime<Utc>> {
    s.as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn to_live_stream(snapshot: &VideoSnapshot, fetched_at: DateTime<Utc>) -> LiveStream {
    LiveStream {
        video_id: snapshot.video_id.clone(),
        title: snapshot.title.clone(),
        channel_id: snapshot.channel_id.clone(),
        channel_title: snapshot.channel_title.clone(),
        thumbnails: snapshot.thumbnails.clone(),
        tags: snapshot.tags.clone(),
        category_id: snapshot.category_id.clone(),
        scheduled_start_time: parse_datetime(&snapshot.scheduled_start_time),
        actual_start_time: parse_datetime(&snapshot.actual_start_time),
        topic_categories: snapshot.topic_categories.clone(),
        live_chat_id: snapshot.live_chat_id.clone(),
        fetched_at,
    }
}

fn to_stream_stats(snapshot: &VideoSnapshot, collected_at: DateTime<Utc>) -> StreamStats {
    StreamStats {
        id: None,
        live_stream_id: snapshot.video_id.clone(),
        collected_at,
        concurrent_viewers: snapshot.concurrent_viewers,
        view_count: snapshot.view_count,
        like_count: snapshot.like_count,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeClient {
        calls: AtomicUsize,
        empty_on_first: bool,
    }

    #[async_trait]
    impl StatsClient for FakeClient {
        async fn fetch(&self, video_id: &str, _api_key: &str) -> Result<Option<VideoSnapshot>> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if self.empty_on_first && call == 0 {
                return Ok(None);
            }
            Ok(Some(VideoSnapshot {
                video_id: video_id.to_string(),
                title: Some("title".into()),
                channel_id: Some("chan".into()),
                channel_title: Some("Channel".into()),
                thumbnails: serde_json::Value::Null,
                tags: vec![],
                category_id: None,
                scheduled_start_time: None,
                actual_start_time: None,
                topic_categories: vec![],
                live_chat_id: Some("chat1".into()),
                concurrent_viewers: Some(42),
                view_count: Some(100),
                like_count: Some(10),
            }))
        }
    }

    #[tokio::test]
    async fn tick_persists_stream_and_stats() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let client = FakeClient { calls: AtomicUsize::new(0), empty_on_first: false };
        let poller = StatsPoller::new(client, store.clone(), "key".into());
        poller.tick("vid1").await.unwrap();

        let stream_row = store.get_setting("unused").unwrap();
        assert!(stream_row.is_none());
    }

    #[tokio::test]
    async fn empty_items_is_not_an_error() {
        let store = Arc::new(Store::open_in_memory().unwrap());
        let client = FakeClient { calls: AtomicUsize::new(0), empty_on_first: true };
        let poller = StatsPoller::new(client, store, "key".into());
        assert!(poller.tick("vid1").await.is_ok());
    }
}
