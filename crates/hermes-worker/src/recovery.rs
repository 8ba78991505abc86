use std::path::Path;

use hermes_core::types::ChatMessage;
use hermes_core::Result;
use hermes_ingest::backup;
use hermes_store::Store;
use tracing::{info, warn};

/// Recover chat backlog left behind by a crash (spec §1, §6.3): every file
/// under `<data_dir>/backup/<video_id>/` is a buffer that was taken off the
/// ingestor but never confirmed fully persisted. Re-run the same
/// write-then-confirm cycle the ingestor itself uses on a live flush:
/// batch-upsert, then delete on full success or rewrite with only the rows
/// that still failed.
///
/// Gated by `ENABLE_BACKFILL` (spec §6.1) — operators who don't want startup
/// to spend time replaying backlog can disable it and run the `hermes-import`
/// CLI (§6.3) against the backup directory manually instead.
pub fn recover_backup_dir(store: &Store, data_dir: &str) -> Result<(usize, usize)> {
    let root = Path::new(data_dir).join("backup");
    if !root.exists() {
        return Ok((0, 0));
    }

    let mut files_processed = 0usize;
    let mut messages_recovered = 0usize;

    for stream_entry in std::fs::read_dir(&root)? {
        let stream_entry = stream_entry?;
        if !stream_entry.file_type()?.is_dir() {
            continue;
        }
        let video_id = stream_entry.file_name().to_string_lossy().to_string();

        for file_entry in std::fs::read_dir(stream_entry.path())? {
            let file_entry = file_entry?;
            let path = file_entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            let raw_messages = match backup::read_backup(&path) {
                Ok(msgs) => msgs,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "unreadable backup file, leaving in place");
                    continue;
                }
            };
            if raw_messages.is_empty() {
                backup::delete_backup(&path)?;
                continue;
            }

            let messages: Vec<ChatMessage> = raw_messages
                .iter()
                .cloned()
                .map(|raw| ChatMessage::from_raw(raw, &video_id))
                .collect();
            let result = store.batch_upsert_chat(&messages)?;
            messages_recovered += result.inserted + result.duplicates;
            files_processed += 1;

            if result.errors.is_empty() {
                backup::delete_backup(&path)?;
            } else {
                let failed_ids: std::collections::HashSet<&str> =
                    result.errors.iter().map(|(id, _)| id.as_str()).collect();
                let still_failed: Vec<_> = raw_messages
                    .into_iter()
                    .filter(|m| failed_ids.contains(m.message_id.as_str()))
                    .collect();
                backup::rewrite_backup(&path, &still_failed)?;
            }

            info!(
                video_id = %video_id,
                path = %path.display(),
                inserted = result.inserted,
                duplicates = result.duplicates,
                errors = result.errors.len(),
                "recovered backlog from crash-backup file"
            );
        }
    }

    Ok((files_processed, messages_recovered))
}
