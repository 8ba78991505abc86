use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::error::{HermesError, Result};

/// Messages are buffered in memory until either this many are pending...
pub const FLUSH_SIZE: usize = 100;
/// ...or this much time has elapsed since the last flush, whichever first.
pub const FLUSH_INTERVAL_SECS: u64 = 5;
/// Normalization batch runs hourly.
pub const NORMALIZATION_CADENCE_SECS: u64 = 60 * 60;
/// Word discovery runs every three hours.
pub const DISCOVERY_CADENCE_SECS: u64 = 3 * 60 * 60;
/// Every outbound HTTP call (stats fetch, AI word-proposal call) times out after this long.
pub const HTTP_TIMEOUT_SECS: u64 = 10;
/// Supervisor restart delay after a worker completes normally.
pub const RESTART_DELAY_NORMAL_SECS: u64 = 30;
/// Supervisor restart delay after a worker panics/returns an error.
pub const RESTART_DELAY_ERROR_SECS: u64 = 60;
/// Brief pause the chat watchdog takes between stopping the stalled
/// ingestor and constructing its replacement (spec §4.4 algorithm 3).
pub const WATCHDOG_RESTART_PAUSE_MILLIS: u64 = 500;
/// ETLExecutionLog.error_message is truncated to this many characters.
pub const ERROR_MESSAGE_MAX_CHARS: usize = 500;
/// `process_chat_messages` pulls at most this many unprocessed rows per run.
pub const NORMALIZATION_BATCH_SIZE: usize = 500;
/// `discover_new_words` looks at processed messages published within this
/// many hours of "now".
pub const DISCOVERY_WINDOW_HOURS: i64 = 3;
/// Below this many recent messages, `discover_new_words` skips the AI call
/// entirely rather than spending a round trip on a near-empty batch.
pub const DISCOVERY_MIN_MESSAGE_COUNT: usize = 20;

/// Top-level Hermes configuration — `hermes.toml` (optional) plus bare
/// environment variable overrides, exactly as listed in the specification's
/// external-interfaces section. No `HERMES_` prefix: these are the original
/// worker's long-standing variable names and treated as a fixed contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HermesConfig {
    pub database_url: Option<String>,
    pub youtube_api_key: Option<String>,
    pub youtube_url: Option<String>,
    /// Not listed among the upstream worker's env vars (spec §6.1 only
    /// specifies the request/response shape, §6.4): the AI word-proposal
    /// endpoint has to be reachable from *somewhere*, so it follows the
    /// same bare-env-var convention as the rest of this struct. Absent ⇒
    /// `discover_new_words` runs against a client that always returns an
    /// empty response (spec §6.4's documented "empty response" case).
    pub word_proposal_endpoint: Option<String>,

    #[serde(default = "default_poll_interval")]
    pub poll_interval: u64,
    #[serde(default)]
    pub enable_backfill: bool,
    #[serde(default = "default_retry_max_attempts")]
    pub retry_max_attempts: u32,
    #[serde(default = "default_retry_backoff_seconds")]
    pub retry_backoff_seconds: u64,
    #[serde(default = "default_url_check_interval")]
    pub url_check_interval: u64,
    #[serde(default = "default_watchdog_timeout")]
    pub chat_watchdog_timeout: u64,
    #[serde(default = "default_watchdog_check_interval")]
    pub chat_watchdog_check_interval: u64,
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Where backup files and (if `database_url` is a sqlite path) the
    /// database itself live. Not an upstream env var in the original
    /// worker (it hardcoded `/data`); kept configurable here.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

impl Default for HermesConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            youtube_api_key: None,
            youtube_url: None,
            word_proposal_endpoint: None,
            poll_interval: default_poll_interval(),
            enable_backfill: false,
            retry_max_attempts: default_retry_max_attempts(),
            retry_backoff_seconds: default_retry_backoff_seconds(),
            url_check_interval: default_url_check_interval(),
            chat_watchdog_timeout: default_watchdog_timeout(),
            chat_watchdog_check_interval: default_watchdog_check_interval(),
            log_level: default_log_level(),
            data_dir: default_data_dir(),
        }
    }
}

fn default_poll_interval() -> u64 {
    60
}
fn default_retry_max_attempts() -> u32 {
    3
}
fn default_retry_backoff_seconds() -> u64 {
    5
}
fn default_url_check_interval() -> u64 {
    10
}
fn default_watchdog_timeout() -> u64 {
    300
}
fn default_watchdog_check_interval() -> u64 {
    30
}
fn default_log_level() -> String {
    "INFO".to_string()
}
fn default_data_dir() -> String {
    "/data".to_string()
}

impl HermesConfig {
    /// Load config: explicit path > `HERMES_CONFIG` env > `./hermes.toml`,
    /// overlaid with the bare environment variables listed in the spec.
    pub fn load(config_path: Option<&str>) -> Result<Self> {
        let path = config_path
            .map(String::from)
            .unwrap_or_else(|| std::env::var("HERMES_CONFIG").unwrap_or_else(|_| "hermes.toml".into()));

        let config: HermesConfig = Figment::new()
            .merge(Toml::file(&path))
            .merge(Env::raw())
            .extract()
            .map_err(|e| HermesError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Fatal-at-startup validation (spec §7): missing `DATABASE_URL` or
    /// `YOUTUBE_API_KEY` aborts the process. `youtube_url` is allowed to be
    /// absent here — the supervisor falls back to `setting[youtube_url]`
    /// (DB wins when both are present, see DESIGN.md open question).
    pub fn validate(&self) -> Result<()> {
        let mut missing = Vec::new();
        if self.database_url.is_none() {
            missing.push("DATABASE_URL");
        }
        if self.youtube_api_key.is_none() {
            missing.push("YOUTUBE_API_KEY");
        }

        if !missing.is_empty() {
            return Err(HermesError::Config(format!(
                "missing required environment variables: {}",
                missing.join(", ")
            )));
        }
        Ok(())
    }

    /// Redacted summary for startup logging — never prints secret values.
    pub fn redacted_summary(&self) -> String {
        format!(
            "database_url={} youtube_api_key={} youtube_url={:?} word_proposal_endpoint={:?} poll_interval={}s \
             enable_backfill={} retry_max_attempts={} retry_backoff_seconds={}s \
             url_check_interval={}s chat_watchdog_timeout={}s chat_watchdog_check_interval={}s log_level={}",
            if self.database_url.is_some() { "***" } else { "NOT SET" },
            if self.youtube_api_key.is_some() { "***" } else { "NOT SET" },
            self.youtube_url,
            self.word_proposal_endpoint,
            self.poll_interval,
            self.enable_backfill,
            self.retry_max_attempts,
            self.retry_backoff_seconds,
            self.url_check_interval,
            self.chat_watchdog_timeout,
            self.chat_watchdog_check_interval,
            self.log_level,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec() {
        let cfg = HermesConfig::default();
        assert_eq!(cfg.poll_interval, 60);
        assert_eq!(cfg.retry_max_attempts, 3);
        assert_eq!(cfg.retry_backoff_seconds, 5);
        assert!(!cfg.enable_backfill);
    }

    #[test]
    fn validate_rejects_missing_required_vars() {
        let cfg = HermesConfig::default();
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("DATABASE_URL"));
        assert!(err.to_string().contains("YOUTUBE_API_KEY"));
    }

    #[test]
    fn validate_allows_missing_youtube_url() {
        let mut cfg = HermesConfig::default();
        cfg.database_url = Some("sqlite://test.db".into());
        cfg.youtube_api_key = Some("key".into());
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn redacted_summary_hides_secrets() {
        let mut cfg = HermesConfig::default();
        cfg.database_url = Some("sqlite://secret-path.db".into());
        cfg.youtube_api_key = Some("super-secret-key".into());
        let summary = cfg.redacted_summary();
        assert!(!summary.contains("secret-path"));
        assert!(!summary.contains("super-secret-key"));
    }
}
