use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use chrono::{DateTime, Duration, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use hermes_core::types::{
    ChatMessage, CurrencyRate, EtlExecutionLog, LiveStream, MessageType, PendingReplaceWord,
    PendingSpecialWord, RawChatPayload, ReviewStatus, StreamStats, UpsertOutcome,
};
use hermes_core::{HermesError, Result};

use crate::db::init_db;

/// Outcome of a batch persist (spec §4.1): each message commits inside its
/// own savepoint, so one bad row does not roll back its siblings.
#[derive(Debug, Default)]
pub struct BatchUpsertResult {
    pub inserted: usize,
    pub duplicates: usize,
    pub errors: Vec<(String, String)>,
}

/// Typed persistence for chat messages, stats, stream metadata, dictionary
/// tables, pending-review tables, the execution log, settings, and currency
/// rates. A single `rusqlite::Connection` guarded by a mutex, matching every
/// persistence crate in the teacher workspace — write paths are short,
/// and the one long read scan (`unprocessed_messages` /
/// `list_recent_messages_for_discovery`) does not hold the mutex across
/// any `.await` point (there are none; rusqlite is synchronous).
pub struct Store {
    conn: Mutex<Connection>,
}

impl Store {
    /// Wrap an already-open connection, initialising the schema if needed.
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::new(conn)
    }

    // -- Chat messages -------------------------------------------------

    /// Insert by `message_id`. A unique-key conflict is `Duplicate`, not an
    /// error, and must never overwrite a prior `processed_text`/`tokens`
    /// (spec §4.1) — hence `INSERT OR IGNORE` rather than an upsert.
    pub fn upsert_chat(&self, msg: &ChatMessage) -> Result<UpsertOutcome> {
        let conn = self.conn.lock().unwrap();
        insert_chat_message(&conn, msg)
    }

    /// Persist every message inside its own savepoint so a poison-pill row
    /// does not lose its siblings (spec §4.1, §5).
    pub fn batch_upsert_chat(&self, msgs: &[ChatMessage]) -> Result<BatchUpsertResult> {
        let mut conn = self.conn.lock().unwrap();
        let mut result = BatchUpsertResult::default();

        for msg in msgs {
            let savepoint = match conn.savepoint() {
                Ok(sp) => sp,
                Err(e) => {
                    result.errors.push((msg.message_id.clone(), e.to_string()));
                    continue;
                }
            };

            match insert_chat_message(&savepoint, msg) {
                Ok(UpsertOutcome::Inserted) => {
                    result.inserted += 1;
                    if let Err(e) = savepoint.commit() {
                        result.errors.push((msg.message_id.clone(), e.to_string()));
                    }
                }
                Ok(UpsertOutcome::Duplicate) => {
                    result.duplicates += 1;
                    if let Err(e) = savepoint.commit() {
                        result.errors.push((msg.message_id.clone(), e.to_string()));
                    }
                }
                Err(e) => {
                    debug!(message_id = %msg.message_id, error = %e, "dropping savepoint for failed message");
                    let _ = savepoint.rollback();
                    result.errors.push((msg.message_id.clone(), e.to_string()));
                }
            }
        }

        Ok(result)
    }

    // -- Stats / stream metadata ----------------------------------------

    /// Always inserts — `StreamStats` is an append-only time series.
    pub fn append_stats(&self, snapshot: &StreamStats) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO stream_stats
             (live_stream_id, collected_at, concurrent_viewers, view_count, like_count)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                snapshot.live_stream_id,
                snapshot.collected_at.to_rfc3339(),
                snapshot.concurrent_viewers,
                snapshot.view_count,
                snapshot.like_count,
            ],
        )?;
        Ok(())
    }

    pub fn upsert_live_stream(&self, stream: &LiveStream) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO live_streams
             (video_id, title, channel_id, channel_title, thumbnails, tags, category_id,
              scheduled_start_time, actual_start_time, topic_categories, live_chat_id, fetched_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)
             ON CONFLICT(video_id) DO UPDATE SET
                title=excluded.title, channel_id=excluded.channel_id,
                channel_title=excluded.channel_title, thumbnails=excluded.thumbnails,
                tags=excluded.tags, category_id=excluded.category_id,
                scheduled_start_time=excluded.scheduled_start_time,
                actual_start_time=excluded.actual_start_time,
                topic_categories=excluded.topic_categories,
                live_chat_id=excluded.live_chat_id, fetched_at=excluded.fetched_at",
            params![
                stream.video_id,
                stream.title,
                stream.channel_id,
                stream.channel_title,
                serde_json::to_string(&stream.thumbnails)?,
                serde_json::to_string(&stream.tags)?,
                stream.category_id,
                stream.scheduled_start_time.map(|t| t.to_rfc3339()),
                stream.actual_start_time.map(|t| t.to_rfc3339()),
                serde_json::to_string(&stream.topic_categories)?,
                stream.live_chat_id,
                stream.fetched_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    // -- Settings --------------------------------------------------------

    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn.lock().unwrap();
        let value = conn
            .query_row(
                "SELECT value FROM system_settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    pub fn put_setting(&self, key: &str, value: &str, description: Option<&str>) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO system_settings (key, value, description) VALUES (?1,?2,?3)
             ON CONFLICT(key) DO UPDATE SET value=excluded.value,
                description=COALESCE(excluded.description, system_settings.description)",
            params![key, value, description],
        )?;
        Ok(())
    }

    // -- ETL stage-A inputs/outputs ---------------------------------------

    /// Messages with `processed_at IS NULL`, oldest-published first. The
    /// `processed_at IS NULL` predicate makes re-running this restartable:
    /// a crash mid-batch simply leaves the remaining rows unprocessed.
    pub fn unprocessed_messages(
        &self,
        limit: usize,
        max_age: Option<Duration>,
        video_id: Option<&str>,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = max_age.map(|age| (Utc::now() - age).to_rfc3339());

        let sql = "SELECT message_id, live_stream_id, author_id, author_name, message_type,
                          message, timestamp, time_text, published_at, emotes, raw_data,
                          processed_text, tokens, unicode_emojis, processed_at
                   FROM chat_messages
                   WHERE processed_at IS NULL
                     AND (?1 IS NULL OR published_at >= ?1)
                     AND (?2 IS NULL OR live_stream_id = ?2)
                   ORDER BY published_at ASC
                   LIMIT ?3";

        let mut stmt = conn.prepare(sql)?;
        let rows = stmt.query_map(params![cutoff, video_id, limit as i64], row_to_chat_message)?;
        collect_rows(rows)
    }

    /// Write back stage-A output. Idempotent via the `processed_at IS NULL`
    /// guard — a second concurrent run on the same row becomes a no-op.
    pub fn mark_processed(
        &self,
        message_id: &str,
        processed_text: &str,
        tokens: &[String],
        unicode_emojis: &[String],
    ) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now().to_rfc3339();
        let changed = conn.execute(
            "UPDATE chat_messages
             SET processed_text = ?1, tokens = ?2, unicode_emojis = ?3, processed_at = ?4
             WHERE message_id = ?5 AND processed_at IS NULL",
            params![
                processed_text,
                serde_json::to_string(tokens)?,
                serde_json::to_string(unicode_emojis)?,
                now,
                message_id,
            ],
        )?;
        Ok(changed > 0)
    }

    // -- Dictionaries ------------------------------------------------------

    /// The replace map is returned as an ordered list (by `rowid`, i.e.
    /// insertion order) because longest-match substitution (spec §4.5.1 step
    /// 3) breaks ties between equal-length matches by insertion order.
    pub fn get_active_dictionaries(&self) -> Result<(Vec<(String, String)>, HashSet<String>, HashSet<String>)> {
        let conn = self.conn.lock().unwrap();

        let mut replace_map = Vec::new();
        {
            let mut stmt = conn.prepare("SELECT source_word, target_word FROM replace_words ORDER BY rowid")?;
            let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
            for row in rows {
                replace_map.push(row?);
            }
        }

        let mut special_set = HashSet::new();
        {
            let mut stmt = conn.prepare("SELECT word FROM special_words")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                special_set.insert(row?);
            }
        }

        let mut meaningless_set = HashSet::new();
        {
            let mut stmt = conn.prepare("SELECT word FROM meaningless_words")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            for row in rows {
                meaningless_set.insert(row?);
            }
        }

        Ok((replace_map, special_set, meaningless_set))
    }

    /// Bulk-upsert entry points for `import_dicts` (spec §4.5.3): `ON CONFLICT
    /// DO NOTHING` for the two sets, `ON CONFLICT DO UPDATE` for the map.
    pub fn import_replace_words(&self, entries: &[(String, String)]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        for (source, target) in entries {
            count += tx.execute(
                "INSERT INTO replace_words (source_word, target_word, updated_at) VALUES (?1,?2,?3)
                 ON CONFLICT(source_word) DO UPDATE SET target_word=excluded.target_word, updated_at=excluded.updated_at",
                params![source, target, now],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn import_special_words(&self, words: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        for word in words {
            count += tx.execute(
                "INSERT INTO special_words (word, updated_at) VALUES (?1,?2) ON CONFLICT(word) DO NOTHING",
                params![word, now],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }

    pub fn import_meaningless_words(&self, words: &[String]) -> Result<usize> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now().to_rfc3339();
        let mut count = 0;
        for word in words {
            count += tx.execute(
                "INSERT INTO meaningless_words (word, updated_at) VALUES (?1,?2) ON CONFLICT(word) DO NOTHING",
                params![word, now],
            )?;
        }
        tx.commit()?;
        Ok(count)
    }

    // -- Word discovery (stage B) ------------------------------------------

    /// Messages published since `window` ago, for the discovery AI call's
    /// input batch. `min_count` is advisory to the caller (the scheduler
    /// skips the AI call entirely when fewer rows than this come back).
    pub fn list_recent_messages_for_discovery(
        &self,
        window: Duration,
        min_count: usize,
    ) -> Result<Vec<ChatMessage>> {
        let conn = self.conn.lock().unwrap();
        let cutoff = (Utc::now() - window).to_rfc3339();
        let mut stmt = conn.prepare(
            "SELECT message_id, live_stream_id, author_id, author_name, message_type,
                    message, timestamp, time_text, published_at, emotes, raw_data,
                    processed_text, tokens, unicode_emojis, processed_at
             FROM chat_messages
             WHERE published_at >= ?1 AND processed_at IS NOT NULL
             ORDER BY published_at ASC",
        )?;
        let rows = stmt.query_map(params![cutoff], row_to_chat_message)?;
        let messages = collect_rows(rows)?;
        if messages.len() < min_count {
            debug!(found = messages.len(), min_count, "discovery window below minimum message count");
        }
        Ok(messages)
    }

    pub fn stage_pending_replace(&self, proposal: &PendingReplaceWord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_replace_words
             (source_word, target_word, status, confidence_score, occurrence_count,
              example_messages, transformation, auto_added, discovered_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9)",
            params![
                proposal.source_word,
                proposal.target_word,
                proposal.status.as_str(),
                proposal.confidence_score,
                proposal.occurrence_count,
                serde_json::to_string(&proposal.example_messages)?,
                proposal.transformation,
                proposal.auto_added as i64,
                proposal.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn stage_pending_special(&self, proposal: &PendingSpecialWord) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pending_special_words
             (word, word_type, status, confidence_score, occurrence_count,
              example_messages, auto_added, discovered_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
            params![
                proposal.word,
                proposal.word_type,
                proposal.status.as_str(),
                proposal.confidence_score,
                proposal.occurrence_count,
                serde_json::to_string(&proposal.example_messages)?,
                proposal.auto_added as i64,
                proposal.discovered_at.to_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Promote a pending replace word into the active table (upserting by
    /// `source_word`) and mark the pending row `approved`. Collision
    /// detection against the protected set (spec §7's "reconciliation
    /// conflict") is the out-of-scope promotion endpoint's responsibility
    /// (spec §1); this is the plain persistence operation it calls once a
    /// promotion has already been approved.
    pub fn promote_pending_replace(&self, id: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let (source, target): (String, String) = tx.query_row(
            "SELECT source_word, target_word FROM pending_replace_words WHERE id = ?1 AND status = 'pending'",
            params![id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO replace_words (source_word, target_word, updated_at) VALUES (?1,?2,?3)
             ON CONFLICT(source_word) DO UPDATE SET target_word=excluded.target_word, updated_at=excluded.updated_at",
            params![source, target, now],
        )?;
        tx.execute(
            "UPDATE pending_replace_words SET status='approved' WHERE id=?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn promote_pending_special(&self, id: i64) -> Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let word: String = tx.query_row(
            "SELECT word FROM pending_special_words WHERE id = ?1 AND status = 'pending'",
            params![id],
            |row| row.get(0),
        )?;
        let now = Utc::now().to_rfc3339();
        tx.execute(
            "INSERT INTO special_words (word, updated_at) VALUES (?1,?2) ON CONFLICT(word) DO NOTHING",
            params![word, now],
        )?;
        tx.execute(
            "UPDATE pending_special_words SET status='approved' WHERE id=?1",
            params![id],
        )?;
        tx.commit()?;
        Ok(())
    }

    pub fn reject_pending_replace(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE pending_replace_words SET status='rejected' WHERE id=?1 AND status='pending'",
            params![id],
        )?;
        Ok(())
    }

    pub fn reject_pending_special(&self, id: i64) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE pending_special_words SET status='rejected' WHERE id=?1 AND status='pending'",
            params![id],
        )?;
        Ok(())
    }

    // -- Currency rates ------------------------------------------------------

    pub fn upsert_currency_rate(&self, rate: &CurrencyRate) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO currency_rates (currency, rate_to_twd, updated_at) VALUES (?1,?2,?3)
             ON CONFLICT(currency) DO UPDATE SET rate_to_twd=excluded.rate_to_twd, updated_at=excluded.updated_at",
            params![rate.currency, rate.rate_to_twd, rate.updated_at.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn get_currency_rate(&self, currency: &str) -> Result<Option<f64>> {
        let conn = self.conn.lock().unwrap();
        let rate = conn
            .query_row(
                "SELECT rate_to_twd FROM currency_rates WHERE currency = ?1",
                params![currency],
                |row| row.get(0),
            )
            .optional()?;
        Ok(rate)
    }

    // -- Execution log ------------------------------------------------------

    /// Insert the `started` half of an `ETLExecutionLog` row, returning its id.
    pub fn start_execution(&self, job_id: &str, started_at: DateTime<Utc>) -> Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO etl_execution_log (job_id, started_at, status, records_processed)
             VALUES (?1, ?2, 'running', 0)",
            params![job_id, started_at.to_rfc3339()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Complete the log row with final status, counts, and a (truncated)
    /// error message on failure.
    pub fn finish_execution(
        &self,
        id: i64,
        completed_at: DateTime<Utc>,
        status: &str,
        records_processed: i64,
        error_message: Option<&str>,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let started_at: String = conn.query_row(
            "SELECT started_at FROM etl_execution_log WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        let started = DateTime::parse_from_rfc3339(&started_at)
            .map(|dt| dt.with_timezone(&Utc))
            .map_err(|e| HermesError::Internal(format!("corrupt started_at timestamp: {e}")))?;
        let duration = (completed_at - started).num_milliseconds() as f64 / 1000.0;

        conn.execute(
            "UPDATE etl_execution_log
             SET completed_at=?1, duration_seconds=?2, status=?3, records_processed=?4,
                 error_message=?5, metadata=?6
             WHERE id=?7",
            params![
                completed_at.to_rfc3339(),
                duration,
                status,
                records_processed,
                error_message,
                serde_json::to_string(metadata)?,
                id,
            ],
        )?;
        Ok(())
    }

    pub fn recent_executions(&self, job_id: &str, limit: usize) -> Result<Vec<EtlExecutionLog>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, job_id, started_at, completed_at, duration_seconds, status,
                    records_processed, error_message, metadata
             FROM etl_execution_log WHERE job_id = ?1 ORDER BY started_at DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![job_id, limit as i64], row_to_execution_log)?;
        collect_rows(rows)
    }
}

fn insert_chat_message(conn: &Connection, msg: &ChatMessage) -> Result<UpsertOutcome> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO chat_messages
         (message_id, live_stream_id, author_id, author_name, message_type, message,
          timestamp, time_text, published_at, emotes, raw_data)
         VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
        params![
            msg.message_id,
            msg.live_stream_id,
            msg.author_id,
            msg.author_name,
            msg.message_type.as_str(),
            msg.message,
            msg.timestamp,
            msg.time_text,
            msg.published_at.to_rfc3339(),
            serde_json::to_string(&msg.emotes)?,
            serde_json::to_string(&msg.raw_data)?,
        ],
    )?;

    if changed == 0 {
        warn!(message_id = %msg.message_id, "duplicate message_id, ignoring (prior processed state preserved)");
        Ok(UpsertOutcome::Duplicate)
    } else {
        Ok(UpsertOutcome::Inserted)
    }
}

fn collect_rows<T>(rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>) -> Result<Vec<T>> {
    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn parse_rfc3339(s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e)))
}

fn row_to_chat_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<ChatMessage> {
    let emotes_json: String = row.get(9)?;
    let raw_json: String = row.get(10)?;
    let tokens_json: Option<String> = row.get(12)?;
    let emojis_json: Option<String> = row.get(13)?;
    let processed_at: Option<String> = row.get(14)?;
    let published_at: String = row.get(8)?;
    let message_type: String = row.get(4)?;

    Ok(ChatMessage {
        message_id: row.get(0)?,
        live_stream_id: row.get(1)?,
        author_id: row.get(2)?,
        author_name: row.get(3)?,
        message_type: MessageType::from_str(&message_type),
        message: row.get(5)?,
        timestamp: row.get(6)?,
        time_text: row.get(7)?,
        published_at: parse_rfc3339(&published_at)?,
        emotes: serde_json::from_str(&emotes_json).unwrap_or_default(),
        raw_data: serde_json::from_str(&raw_json).unwrap_or_else(|_| RawChatPayload::default()),
        processed_text: row.get(11)?,
        tokens: tokens_json.and_then(|s| serde_json::from_str(&s).ok()),
        unicode_emojis: emojis_json.and_then(|s| serde_json::from_str(&s).ok()),
        processed_at: processed_at
            .map(|s| parse_rfc3339(&s))
            .transpose()?,
    })
}

fn row_to_execution_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<EtlExecutionLog> {
    let started_at: String = row.get(2)?;
    let completed_at: Option<String> = row.get(3)?;
    let metadata_json: String = row.get(8)?;
    Ok(EtlExecutionLog {
        id: Some(row.get(0)?),
        job_id: row.get(1)?,
        started_at: parse_rfc3339(&started_at)?,
        completed_at: completed_at.map(|s| parse_rfc3339(&s)).transpose()?,
        duration_seconds: row.get(4)?,
        status: row.get(5)?,
        records_processed: row.get(6)?,
        error_message: row.get(7)?,
        metadata: serde_json::from_str(&metadata_json).unwrap_or(serde_json::Value::Null),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_core::types::RawChatMessage;

    fn sample_message(id: &str) -> ChatMessage {
        let raw = RawChatMessage {
            message_id: id.to_string(),
            message: "hello world".to_string(),
            timestamp: 1_700_000_000_000_000,
            time_text: Some("3 seconds ago".to_string()),
            author_id: "author-1".to_string(),
            author_name: "Alice".to_string(),
            message_type: "text_message".to_string(),
            emotes: vec![],
            money: None,
            badges: vec![],
            extra: serde_json::Value::Null,
        };
        ChatMessage::from_raw(raw, "video-1")
    }

    #[test]
    fn upsert_then_duplicate() {
        let store = Store::open_in_memory().unwrap();
        let msg = sample_message("m1");
        assert_eq!(store.upsert_chat(&msg).unwrap(), UpsertOutcome::Inserted);
        assert_eq!(store.upsert_chat(&msg).unwrap(), UpsertOutcome::Duplicate);
    }

    #[test]
    fn duplicate_does_not_clobber_processed_state() {
        let store = Store::open_in_memory().unwrap();
        let msg = sample_message("m2");
        store.upsert_chat(&msg).unwrap();
        store
            .mark_processed("m2", "hello world", &["hello".into(), "world".into()], &[])
            .unwrap();

        // Re-ingest the same message_id (simulating iterator re-emission).
        store.upsert_chat(&msg).unwrap();

        let unprocessed = store.unprocessed_messages(10, None, None).unwrap();
        assert!(unprocessed.is_empty(), "processed row must not reappear as unprocessed");
    }

    #[test]
    fn batch_upsert_counts_duplicates() {
        let store = Store::open_in_memory().unwrap();
        let m1 = sample_message("b1");
        let m2 = sample_message("b2");
        let result = store.batch_upsert_chat(&[m1.clone(), m2.clone(), m1]).unwrap();
        assert_eq!(result.inserted, 2);
        assert_eq!(result.duplicates, 1);
        assert!(result.errors.is_empty());
    }

    #[test]
    fn mark_processed_is_idempotent_by_null_guard() {
        let store = Store::open_in_memory().unwrap();
        let msg = sample_message("m3");
        store.upsert_chat(&msg).unwrap();
        let first = store.mark_processed("m3", "a", &["a".into()], &[]).unwrap();
        let second = store.mark_processed("m3", "b", &["b".into()], &[]).unwrap();
        assert!(first);
        assert!(!second, "second call on an already-processed row must be a no-op");

        let msgs = store.unprocessed_messages(10, None, None).unwrap();
        assert!(msgs.is_empty());
    }

    #[test]
    fn settings_roundtrip() {
        let store = Store::open_in_memory().unwrap();
        assert_eq!(store.get_setting("youtube_url").unwrap(), None);
        store.put_setting("youtube_url", "https://youtu.be/abc", None).unwrap();
        assert_eq!(store.get_setting("youtube_url").unwrap(), Some("https://youtu.be/abc".into()));
        store.put_setting("youtube_url", "https://youtu.be/xyz", None).unwrap();
        assert_eq!(store.get_setting("youtube_url").unwrap(), Some("https://youtu.be/xyz".into()));
    }

    #[test]
    fn import_dicts_upsert_semantics() {
        let store = Store::open_in_memory().unwrap();
        store.import_replace_words(&[("a".into(), "b".into())]).unwrap();
        store.import_replace_words(&[("a".into(), "c".into())]).unwrap();
        let (map, _, _) = store.get_active_dictionaries().unwrap();
        assert_eq!(
            map.iter().find(|(s, _)| s == "a").map(|(_, t)| t.as_str()),
            Some("c"),
            "replace_words does ON CONFLICT DO UPDATE"
        );

        store.import_special_words(&["x".into()]).unwrap();
        store.import_special_words(&["x".into()]).unwrap();
        let (_, special, _) = store.get_active_dictionaries().unwrap();
        assert_eq!(special.len(), 1, "special_words does ON CONFLICT DO NOTHING");
    }

    #[test]
    fn stage_and_promote_pending_replace() {
        let store = Store::open_in_memory().unwrap();
        let proposal = PendingReplaceWord {
            id: None,
            source_word: "foo".into(),
            target_word: "bar".into(),
            status: ReviewStatus::Pending,
            confidence_score: 0.9,
            occurrence_count: 3,
            example_messages: vec!["foo!".into()],
            transformation: None,
            auto_added: false,
            discovered_at: Utc::now(),
        };
        let id = store.stage_pending_replace(&proposal).unwrap();
        store.promote_pending_replace(id).unwrap();
        let (map, _, _) = store.get_active_dictionaries().unwrap();
        assert_eq!(map.iter().find(|(s, _)| s == "foo").map(|(_, t)| t.as_str()), Some("bar"));
    }
}
