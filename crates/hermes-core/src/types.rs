use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Natural-key identifier for a broadcast (the 11-character YouTube video id).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VideoId(pub String);

impl VideoId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VideoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for VideoId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for VideoId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// An emote reference exactly as stored on `ChatMessage.emotes` (source §6.2: YouTube
/// emote list, ordered, with repetition preserved).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Emote {
    pub name: String,
    pub url: String,
}

/// A super-chat / membership payment amount.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Money {
    pub currency: String,
    pub amount: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BadgeIcon {
    pub id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorBadge {
    pub title: String,
    #[serde(default)]
    pub icons: Vec<BadgeIcon>,
}

/// Typed projection of the chat object's unschematized payload (spec Design Note
/// "Dynamic payload fields"): the fields actually consumed are typed; everything
/// else is preserved verbatim in `extra` for forward compatibility.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawChatPayload {
    #[serde(default)]
    pub money: Option<Money>,
    #[serde(default)]
    pub badges: Vec<AuthorBadge>,
    /// Everything else the source iterator attached to this chat object.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// `message_type` values observed from the chat source (spec §3). Unknown
/// variants round-trip via `Other` so the pipeline never drops a row because
/// the source introduced a new type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageType {
    TextMessage,
    PaidMessage,
    TickerPaidMessageItem,
    MembershipItem,
    Other(String),
}

impl Serialize for MessageType {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for MessageType {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Ok(MessageType::from_str(&s))
    }
}

impl MessageType {
    /// Boundary case from spec §8: the "paid" filter includes exactly these two.
    pub fn is_paid(&self) -> bool {
        matches!(self, MessageType::PaidMessage | MessageType::TickerPaidMessageItem)
    }

    pub fn as_str(&self) -> &str {
        match self {
            MessageType::TextMessage => "text_message",
            MessageType::PaidMessage => "paid_message",
            MessageType::TickerPaidMessageItem => "ticker_paid_message_item",
            MessageType::MembershipItem => "membership_item",
            MessageType::Other(s) => s,
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "text_message" => MessageType::TextMessage,
            "paid_message" => MessageType::PaidMessage,
            "ticker_paid_message_item" => MessageType::TickerPaidMessageItem,
            "membership_item" => MessageType::MembershipItem,
            other => MessageType::Other(other.to_string()),
        }
    }
}

/// A chat message exactly as received from the opaque chat iterator (spec §6.2),
/// before it is wrapped into a [`ChatMessage`] row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawChatMessage {
    pub message_id: String,
    pub message: String,
    /// Source-provided microsecond timestamp.
    pub timestamp: i64,
    pub time_text: Option<String>,
    pub author_id: String,
    pub author_name: String,
    pub message_type: String,
    #[serde(default)]
    pub emotes: Vec<Emote>,
    #[serde(default)]
    pub money: Option<Money>,
    #[serde(default)]
    pub badges: Vec<AuthorBadge>,
    /// Anything else the source attached — preserved verbatim.
    #[serde(default)]
    pub extra: serde_json::Value,
}

/// A persisted chat message row (spec §3). `message_id` is globally unique;
/// `processed_at` is null iff `tokens` is null.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub message_id: String,
    pub live_stream_id: String,
    pub author_id: String,
    pub author_name: String,
    pub message_type: MessageType,
    pub message: String,
    pub timestamp: i64,
    pub time_text: Option<String>,
    pub published_at: DateTime<Utc>,
    pub emotes: Vec<Emote>,
    pub raw_data: RawChatPayload,
    pub processed_text: Option<String>,
    pub tokens: Option<Vec<String>>,
    pub unicode_emojis: Option<Vec<String>>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl ChatMessage {
    /// Build from the wire shape, assigning `published_at` from the source's
    /// microsecond timestamp (the upstream iterator does not supply a
    /// separate wall-clock instant — `chat_collector.py` treats `timestamp`
    /// as authoritative).
    pub fn from_raw(raw: RawChatMessage, live_stream_id: &str) -> Self {
        let published_at = DateTime::<Utc>::from_timestamp_micros(raw.timestamp)
            .unwrap_or_else(Utc::now);
        Self {
            message_id: raw.message_id,
            live_stream_id: live_stream_id.to_string(),
            author_id: raw.author_id,
            author_name: raw.author_name,
            message_type: MessageType::from_str(&raw.message_type),
            message: raw.message,
            timestamp: raw.timestamp,
            time_text: raw.time_text,
            published_at,
            emotes: raw.emotes,
            raw_data: RawChatPayload {
                money: raw.money,
                badges: raw.badges,
                extra: raw.extra,
            },
            processed_text: None,
            tokens: None,
            unicode_emojis: None,
            processed_at: None,
        }
    }
}

/// Result of a single upsert — a duplicate key is not an error (spec §4.1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Duplicate,
}

/// A snapshot row in the append-only `StreamStats` time series (spec §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamStats {
    pub id: Option<i64>,
    pub live_stream_id: String,
    pub collected_at: DateTime<Utc>,
    pub concurrent_viewers: Option<i64>,
    pub view_count: Option<i64>,
    pub like_count: Option<i64>,
}

/// Upserted broadcast metadata (spec §3), modeled on the YouTube Data API
/// `videos.list` response shape (`part=snippet,liveStreamingDetails,statistics`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveStream {
    pub video_id: String,
    pub title: Option<String>,
    pub channel_id: Option<String>,
    pub channel_title: Option<String>,
    pub thumbnails: serde_json::Value,
    pub tags: Vec<String>,
    pub category_id: Option<String>,
    pub scheduled_start_time: Option<DateTime<Utc>>,
    pub actual_start_time: Option<DateTime<Utc>>,
    pub topic_categories: Vec<String>,
    pub live_chat_id: Option<String>,
    pub fetched_at: DateTime<Utc>,
}

/// `SystemSetting` (spec §3). The well-known key observed by the supervisor.
pub const SETTING_YOUTUBE_URL: &str = "youtube_url";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemSetting {
    pub key: String,
    pub value: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplaceWord {
    pub source_word: String,
    pub target_word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpecialWord {
    pub word: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeaninglessWord {
    pub word: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    Pending,
    Approved,
    Rejected,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::Pending => "pending",
            ReviewStatus::Approved => "approved",
            ReviewStatus::Rejected => "rejected",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ReviewStatus::Pending),
            "approved" => Some(ReviewStatus::Approved),
            "rejected" => Some(ReviewStatus::Rejected),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingReplaceWord {
    pub id: Option<i64>,
    pub source_word: String,
    pub target_word: String,
    pub status: ReviewStatus,
    pub confidence_score: f64,
    pub occurrence_count: i64,
    pub example_messages: Vec<String>,
    pub transformation: Option<String>,
    pub auto_added: bool,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingSpecialWord {
    pub id: Option<i64>,
    pub word: String,
    pub word_type: String,
    pub status: ReviewStatus,
    pub confidence_score: f64,
    pub occurrence_count: i64,
    pub example_messages: Vec<String>,
    pub auto_added: bool,
    pub discovered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CurrencyRate {
    pub currency: String,
    pub rate_to_twd: f64,
    pub updated_at: DateTime<Utc>,
}

/// Job identifiers for the three ETL jobs (spec §4.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobId {
    ProcessChatMessages,
    DiscoverNewWords,
    ImportDicts,
}

impl JobId {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobId::ProcessChatMessages => "process_chat_messages",
            JobId::DiscoverNewWords => "discover_new_words",
            JobId::ImportDicts => "import_dicts",
        }
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Completed,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EtlExecutionLog {
    pub id: Option<i64>,
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,
    pub status: String,
    pub records_processed: i64,
    pub error_message: Option<String>,
    pub metadata: serde_json::Value,
}

/// Truncate an error message to the execution log's fixed cap (spec §4.5).
pub fn truncate_error_message(msg: &str) -> String {
    if msg.chars().count() <= crate::config::ERROR_MESSAGE_MAX_CHARS {
        msg.to_string()
    } else {
        msg.chars()
            .take(crate::config::ERROR_MESSAGE_MAX_CHARS)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paid_filter_boundary() {
        assert!(MessageType::PaidMessage.is_paid());
        assert!(MessageType::TickerPaidMessageItem.is_paid());
        assert!(!MessageType::TextMessage.is_paid());
        assert!(!MessageType::MembershipItem.is_paid());
        assert!(!MessageType::Other("sponsorships_gift_purchase_announcement".into()).is_paid());
    }

    #[test]
    fn truncates_long_error_messages() {
        let long = "x".repeat(1000);
        let truncated = truncate_error_message(&long);
        assert_eq!(truncated.chars().count(), 500);
    }

    #[test]
    fn short_error_messages_untouched() {
        assert_eq!(truncate_error_message("boom"), "boom");
    }
}
