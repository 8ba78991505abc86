use hermes_core::types::RawChatMessage;
use hermes_core::Result;

/// Adapter over an opaque live-chat iterator (spec §4.2, §6.2). A concrete
/// implementation wraps whatever upstream client actually pulls messages off
/// the wire; the ingestor only needs blocking iteration and a single
/// URL-to-video-id entry point.
///
/// Modeled on [`Channel`]-style adapters in the reference workspace: one
/// trait object per upstream dependency, object-safe so it can be boxed and
/// driven from a single worker task.
pub trait ChatSource: Send {
    /// Begin iterating messages for `url`. Blocks the calling thread until
    /// the stream ends, the source errors, or `is_cancelled` starts
    /// returning `true`. Each message is delivered via `on_message` as it
    /// arrives — the source itself buffers nothing.
    fn run(
        &mut self,
        url: &str,
        is_cancelled: &dyn Fn() -> bool,
        on_message: &mut dyn FnMut(RawChatMessage),
    ) -> Result<()>;
}

/// Extract an 11-character video id from any of the three URL shapes the
/// source accepts (spec §4.4, §8: exactly `[A-Za-z0-9_-]{11}` from
/// `watch?v=`, `youtu.be/`, or `youtube.com/live/`; anything else is
/// ignored rather than guessed at).
pub fn extract_video_id_from_url(url: &str) -> Option<String> {
    let re = regex::Regex::new(
        r"(?:youtube\.com/watch\?v=|youtu\.be/|youtube\.com/live/)([A-Za-z0-9_-]{11})(?:[^A-Za-z0-9_-]|$)",
    )
    .expect("static regex is valid");
    re.captures(url)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_from_watch_url() {
        assert_eq!(
            extract_video_id_from_url("https://www.youtube.com/watch?v=dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extracts_from_short_url() {
        assert_eq!(
            extract_video_id_from_url("https://youtu.be/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn extracts_from_live_url() {
        assert_eq!(
            extract_video_id_from_url("https://www.youtube.com/live/dQw4w9WgXcQ"),
            Some("dQw4w9WgXcQ".to_string())
        );
    }

    #[test]
    fn rejects_unrelated_url() {
        assert_eq!(extract_video_id_from_url("https://example.com/video"), None);
    }

    #[test]
    fn rejects_id_of_wrong_length() {
        assert_eq!(extract_video_id_from_url("https://youtu.be/short"), None);
        assert_eq!(
            extract_video_id_from_url("https://youtu.be/dQw4w9WgXcQextra"),
            None
        );
    }
}
