use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use hermes_core::config::HTTP_TIMEOUT_SECS;
use hermes_core::{HermesError, Result};

const VIDEOS_ENDPOINT: &str = "https://www.googleapis.com/youtube/v3/videos";

/// One fetched broadcast snapshot, shaped directly off the YouTube Data API
/// `videos.list` response (`part=snippet,liveStreamingDetails,statistics`).
#[derive(Debug, Clone)]
pub struct VideoSnapshot {
    pub video_id: String,
    pub title: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub thumbnails: serde_json::Value,
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    pub scheduled_start_time: Option<String>,
    pub actual_start_time: Option<String>,
    pub topic_categories: Vec<String>,
    pub live_chat_id: Option<String>,
    pub concurrent_viewers: Option<i64>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
}

/// Abstracts the YouTube Data API call so the poller can be exercised with a
/// fake in tests (mirrors the `Channel`-trait seam the reference workspace
/// puts in front of every external dependency).
#[async_trait]
pub trait StatsClient: Send + Sync {
    async fn fetch(&self, video_id: &str, api_key: &str) -> Result<Option<VideoSnapshot>>;
}

pub struct YoutubeStatsClient {
    http: reqwest::Client,
}

impl YoutubeStatsClient {
    pub fn new() -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(HTTP_TIMEOUT_SECS))
            .build()
            .map_err(|e| HermesError::Http(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl StatsClient for YoutubeStatsClient {
    async fn fetch(&self, video_id: &str, api_key: &str) -> Result<Option<VideoSnapshot>> {
        let response = self
            .http
            .get(VIDEOS_ENDPOINT)
            .query(&[
                ("part", "snippet,liveStreamingDetails,statistics,topicDetails"),
                ("id", video_id),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(|e| HermesError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(HermesError::Http(format!(
                "youtube videos endpoint returned {}",
                response.status()
            )));
        }

        let body: VideosListResponse = response
            .json()
            .await
            .map_err(|e| HermesError::Http(e.to_string()))?;

        Ok(body.items.into_iter().next().map(|item| to_snapshot(video_id, item)))
    }
}

fn to_snapshot(video_id: &str, item: VideoItem) -> VideoSnapshot {
    let snippet = item.snippet.unwrap_or_default();
    let live = item.live_streaming_details.unwrap_or_default();
    let stats = item.statistics.unwrap_or_default();
    let topics = item.topic_details.unwrap_or_default();

    VideoSnapshot {
        video_id: video_id.to_string(),
        title: snippet.title,
        channel_id: snippet.channel_id,
        channel_title: snippet.channel_title,
        thumbnails: snippet.thumbnails.unwrap_or(serde_json::Value::Null),
        tags: snippet.tags,
        category_id: snippet.category_id,
        scheduled_start_time: live.scheduled_start_time,
        actual_start_time: live.actual_start_time,
        topic_categories: topics.topic_categories,
        live_chat_id: live.active_live_chat_id,
        concurrent_viewers: live.concurrent_viewers.and_then(|s| s.parse().ok()),
        view_count: stats.view_count.and_then(|s| s.parse().ok()),
        like_count: stats.like_count.and_then(|s| s.parse().ok()),
    }
}

#[derive(Debug, Deserialize)]
struct VideosListResponse {
    #[serde(default)]
    items: Vec<VideoItem>,
}

#[derive(Debug, Deserialize)]
struct VideoItem {
    #[serde(default)]
    snippet: Option<Snippet>,
    #[serde(rename = "liveStreamingDetails", default)]
    live_streaming_details: Option<LiveStreamingDetails>,
    #[serde(default)]
    statistics: Option<Statistics>,
    #[serde(rename = "topicDetails", default)]
    topic_details: Option<TopicDetails>,
}

#[derive(Debug, Deserialize, Default)]
struct Snippet {
    title: Option<String>,
    #[serde(rename = "channelId")]
    channel_id: Option<String>,
    #[serde(rename = "channelTitle")]
    channel_title: Option<String>,
    thumbnails: Option<serde_json::Value>,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(rename = "categoryId")]
    category_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct LiveStreamingDetails {
    #[serde(rename = "scheduledStartTime")]
    scheduled_start_time: Option<String>,
    #[serde(rename = "actualStartTime")]
    actual_start_time: Option<String>,
    #[serde(rename = "concurrentViewers")]
    concurrent_viewers: Option<String>,
    #[serde(rename = "activeLiveChatId")]
    active_live_chat_id: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct Statistics {
    #[serde(rename = "viewCount")]
    view_count: Option<String>,
    #[serde(rename = "likeCount")]
    like_count: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct TopicDetails {
    #[serde(rename = "topicCategories", default)]
    topic_categories: Vec<String>,
}
