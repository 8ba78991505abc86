use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use hermes_core::types::RawChatMessage;
use hermes_core::Result;

/// In-process counter breaking ties when two flushes land in the same
/// unix-timestamp second (spec §5: "unique by unix-timestamp second and
/// in-process counter").
static BACKUP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// `<data>/backup/<video_id>/` — exclusive per process for a given video id.
pub fn backup_dir(data_dir: &str, video_id: &str) -> PathBuf {
    Path::new(data_dir).join("backup").join(video_id)
}

/// Write a fresh backup file for a just-taken buffer. Returns its path so the
/// caller can delete or rewrite it once the batch upsert resolves.
pub fn write_backup(data_dir: &str, video_id: &str, messages: &[RawChatMessage]) -> Result<PathBuf> {
    let dir = backup_dir(data_dir, video_id);
    fs::create_dir_all(&dir)?;

    let unix_ts = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    let counter = BACKUP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = if counter == 0 {
        format!("chat_buffer_backup_{unix_ts}.json")
    } else {
        format!("chat_buffer_backup_{unix_ts}_{counter}.json")
    };
    let path = dir.join(name);

    let json = serde_json::to_vec_pretty(messages)?;
    fs::write(&path, json)?;
    Ok(path)
}

/// Replace a backup file's contents with only the messages that are still
/// unpersisted (spec §4.2: "rewrites the backup file with only the messages
/// that failed").
pub fn rewrite_backup(path: &Path, still_failed: &[RawChatMessage]) -> Result<()> {
    let json = serde_json::to_vec_pretty(still_failed)?;
    fs::write(path, json)?;
    Ok(())
}

/// Delete a backup file once its whole batch has been persisted successfully.
pub fn delete_backup(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Read a backup file's contents back into the wire shape (used by both
/// crash-recovery on startup and the standalone import tool).
pub fn read_backup(path: &Path) -> Result<Vec<RawChatMessage>> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample() -> RawChatMessage {
        RawChatMessage {
            message_id: "m1".into(),
            message: "hi".into(),
            timestamp: 1,
            time_text: None,
            author_id: "a1".into(),
            author_name: "Alice".into(),
            message_type: "text_message".into(),
            emotes: vec![],
            money: None,
            badges: vec![],
            extra: serde_json::Value::Null,
        }
    }

    #[test]
    fn write_then_read_roundtrip() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let path = write_backup(data_dir, "vid1", &[sample()]).unwrap();
        assert!(path.exists());
        let read_back = read_backup(&path).unwrap();
        assert_eq!(read_back.len(), 1);
        assert_eq!(read_back[0].message_id, "m1");
    }

    #[test]
    fn rewrite_then_delete() {
        let dir = tempdir().unwrap();
        let data_dir = dir.path().to_str().unwrap();
        let path = write_backup(data_dir, "vid1", &[sample(), sample()]).unwrap();
        rewrite_backup(&path, &[sample()]).unwrap();
        assert_eq!(read_backup(&path).unwrap().len(), 1);
        delete_backup(&path).unwrap();
        assert!(!path.exists());
        // Deleting twice is not an error.
        delete_backup(&path).unwrap();
    }
}
