use rusqlite::Connection;

use hermes_core::Result;

/// Initialise every Hermes table and its supporting indexes. Safe to call on
/// every startup — all DDL is `IF NOT EXISTS`.
pub fn init_db(conn: &Connection) -> Result<()> {
    create_chat_messages(conn)?;
    create_stream_stats(conn)?;
    create_live_streams(conn)?;
    create_settings(conn)?;
    create_dictionaries(conn)?;
    create_pending_tables(conn)?;
    create_currency_rates(conn)?;
    create_execution_log(conn)?;
    Ok(())
}

fn create_chat_messages(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS chat_messages (
            message_id      TEXT PRIMARY KEY,
            live_stream_id  TEXT NOT NULL,
            author_id       TEXT NOT NULL,
            author_name     TEXT NOT NULL,
            message_type    TEXT NOT NULL,
            message         TEXT NOT NULL,
            timestamp       INTEGER NOT NULL,
            time_text       TEXT,
            published_at    TEXT NOT NULL,
            emotes          TEXT NOT NULL DEFAULT '[]',
            raw_data        TEXT NOT NULL DEFAULT '{}',
            processed_text  TEXT,
            tokens          TEXT,
            unicode_emojis  TEXT,
            processed_at    TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_chat_stream_published
            ON chat_messages(live_stream_id, published_at);
        CREATE INDEX IF NOT EXISTS idx_chat_unprocessed
            ON chat_messages(processed_at, published_at);",
    )?;
    Ok(())
}

fn create_stream_stats(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS stream_stats (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            live_stream_id      TEXT NOT NULL,
            collected_at        TEXT NOT NULL,
            concurrent_viewers  INTEGER,
            view_count          INTEGER,
            like_count          INTEGER
        );
        CREATE INDEX IF NOT EXISTS idx_stats_stream_collected
            ON stream_stats(live_stream_id, collected_at);",
    )?;
    Ok(())
}

fn create_live_streams(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS live_streams (
            video_id              TEXT PRIMARY KEY,
            title                 TEXT,
            channel_id            TEXT,
            channel_title         TEXT,
            thumbnails            TEXT NOT NULL DEFAULT '{}',
            tags                  TEXT NOT NULL DEFAULT '[]',
            category_id           TEXT,
            scheduled_start_time  TEXT,
            actual_start_time     TEXT,
            topic_categories      TEXT NOT NULL DEFAULT '[]',
            live_chat_id          TEXT,
            fetched_at            TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_settings(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS system_settings (
            key          TEXT PRIMARY KEY,
            value        TEXT NOT NULL,
            description  TEXT
        );",
    )?;
    Ok(())
}

fn create_dictionaries(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS replace_words (
            source_word  TEXT PRIMARY KEY,
            target_word  TEXT NOT NULL,
            updated_at   TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS special_words (
            word        TEXT PRIMARY KEY,
            updated_at  TEXT NOT NULL
        );
        CREATE TABLE IF NOT EXISTS meaningless_words (
            word        TEXT PRIMARY KEY,
            updated_at  TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_pending_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS pending_replace_words (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            source_word        TEXT NOT NULL,
            target_word        TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'pending',
            confidence_score   REAL NOT NULL DEFAULT 0,
            occurrence_count   INTEGER NOT NULL DEFAULT 0,
            example_messages   TEXT NOT NULL DEFAULT '[]',
            transformation     TEXT,
            auto_added         INTEGER NOT NULL DEFAULT 0,
            discovered_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_replace_status
            ON pending_replace_words(status);
        CREATE TABLE IF NOT EXISTS pending_special_words (
            id                 INTEGER PRIMARY KEY AUTOINCREMENT,
            word               TEXT NOT NULL,
            word_type          TEXT NOT NULL,
            status             TEXT NOT NULL DEFAULT 'pending',
            confidence_score   REAL NOT NULL DEFAULT 0,
            occurrence_count   INTEGER NOT NULL DEFAULT 0,
            example_messages   TEXT NOT NULL DEFAULT '[]',
            auto_added         INTEGER NOT NULL DEFAULT 0,
            discovered_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_pending_special_status
            ON pending_special_words(status);",
    )?;
    Ok(())
}

fn create_currency_rates(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS currency_rates (
            currency      TEXT PRIMARY KEY,
            rate_to_twd   REAL NOT NULL,
            updated_at    TEXT NOT NULL
        );",
    )?;
    Ok(())
}

fn create_execution_log(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS etl_execution_log (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            job_id              TEXT NOT NULL,
            started_at          TEXT NOT NULL,
            completed_at        TEXT,
            duration_seconds    REAL,
            status              TEXT NOT NULL,
            records_processed   INTEGER NOT NULL DEFAULT 0,
            error_message       TEXT,
            metadata            TEXT NOT NULL DEFAULT '{}'
        );
        CREATE INDEX IF NOT EXISTS idx_execution_log_job
            ON etl_execution_log(job_id, started_at DESC);",
    )?;
    Ok(())
}
