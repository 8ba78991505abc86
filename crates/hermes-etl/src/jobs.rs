use hermes_core::config::{DISCOVERY_MIN_MESSAGE_COUNT, DISCOVERY_WINDOW_HOURS, NORMALIZATION_BATCH_SIZE};
use hermes_core::Result;
use hermes_store::Store;

use crate::discovery::WordProposalClient;
use crate::normalization::{normalize, Tokenizer};
use crate::{discovery, import};

/// `process_chat_messages` (spec §4.5.1): normalize and tokenize up to
/// [`NORMALIZATION_BATCH_SIZE`] unprocessed rows against a single snapshot
/// of the active dictionaries. Returns the count written back and a
/// metadata blob for the execution log.
pub fn process_chat_messages(store: &Store) -> Result<(usize, serde_json::Value)> {
    let (replace_map, special_words, meaningless_words) = store.get_active_dictionaries()?;
    let tokenizer = Tokenizer::new(&special_words);
    let messages = store.unprocessed_messages(NORMALIZATION_BATCH_SIZE, None, None)?;

    let mut processed = 0usize;
    for message in &messages {
        let normalized = normalize(message, &replace_map, &meaningless_words, &tokenizer);
        if store.mark_processed(
            &message.message_id,
            &normalized.processed_text,
            &normalized.tokens,
            &normalized.unicode_emojis,
        )? {
            processed += 1;
        }
    }

    Ok((
        processed,
        serde_json::json!({ "batch_size": NORMALIZATION_BATCH_SIZE, "candidates": messages.len() }),
    ))
}

/// `discover_new_words` (spec §4.5.2): reconcile AI-proposed dictionary
/// deltas over the trailing [`DISCOVERY_WINDOW_HOURS`]-hour window and stage
/// whatever survives.
pub async fn discover_new_words(store: &Store, client: &dyn WordProposalClient) -> Result<(usize, serde_json::Value)> {
    let outcome = discovery::run_discovery(
        store,
        client,
        chrono::Duration::hours(DISCOVERY_WINDOW_HOURS),
        DISCOVERY_MIN_MESSAGE_COUNT,
    )
    .await?;

    Ok((
        outcome.records_processed,
        serde_json::json!({
            "staged_replace": outcome.staged_replace,
            "staged_special": outcome.staged_special,
        }),
    ))
}

/// `import_dicts` (spec §4.5.3): a manual job, not on the cron cadence —
/// invoked from the `hermes-import` CLI or ad hoc by an operator.
pub fn import_dicts(store: &Store, dir: &std::path::Path) -> Result<(usize, serde_json::Value)> {
    let report = import::import_dicts_from_dir(store, dir)?;
    Ok((
        report.replace_words + report.special_words + report.meaningless_words,
        serde_json::json!({
            "replace_words": report.replace_words,
            "special_words": report.special_words,
            "meaningless_words": report.meaningless_words,
        }),
    ))
}
