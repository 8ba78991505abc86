pub mod backup;
pub mod ingestor;
pub mod source;

pub use ingestor::{ChatIngestor, Heartbeat, IngestorState};
pub use source::{extract_video_id_from_url, ChatSource};
