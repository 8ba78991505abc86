use thiserror::Error;

#[derive(Debug, Error)]
pub enum HermesError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not extract video id from url: {0}")]
    VideoIdExtraction(String),

    #[error("Chat source error: {0}")]
    ChatSource(String),

    #[error("ETL job error ({job_id}): {reason}")]
    Etl { job_id: String, reason: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl HermesError {
    /// Short machine-readable code, mirrored into `ETLExecutionLog.error_message`
    /// and worker log lines so failures are greppable across components.
    pub fn code(&self) -> &'static str {
        match self {
            HermesError::Config(_) => "CONFIG_ERROR",
            HermesError::Database(_) => "DATABASE_ERROR",
            HermesError::Io(_) => "IO_ERROR",
            HermesError::Http(_) => "HTTP_ERROR",
            HermesError::Serialization(_) => "SERIALIZATION_ERROR",
            HermesError::VideoIdExtraction(_) => "VIDEO_ID_ERROR",
            HermesError::ChatSource(_) => "CHAT_SOURCE_ERROR",
            HermesError::Etl { .. } => "ETL_ERROR",
            HermesError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, HermesError>;
