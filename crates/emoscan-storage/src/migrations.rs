//! Database schema migrations.
//!
//! The schema has no incremental upgrade path. When the recorded version
//! differs from [`SCHEMA_VERSION`], the history and preference tables are
//! dropped and recreated empty.

use rusqlite::Connection;
use tracing::{info, warn};

use emoscan_core::error::EmoscanError;

/// Version of the schema this build writes.
pub const SCHEMA_VERSION: i64 = 1;

/// Bring the schema to [`SCHEMA_VERSION`].
pub fn run_migrations(conn: &Connection) -> Result<(), EmoscanError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version     INTEGER PRIMARY KEY NOT NULL,
            name        TEXT NOT NULL,
            applied_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );",
    )
    .map_err(|e| EmoscanError::Storage(format!("Failed to create migrations table: {}", e)))?;

    let current_version = current_version(conn)?;

    if current_version == SCHEMA_VERSION {
        return Ok(());
    }

    if current_version != 0 {
        warn!(
            found = current_version,
            expected = SCHEMA_VERSION,
            "Schema version mismatch, recreating history tables"
        );
        drop_all(conn)?;
    }

    apply_v1(conn)?;
    info!("Applied migration v1: analysis_history");
    Ok(())
}

/// Highest applied version, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64, EmoscanError> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_migrations",
        [],
        |row| row.get(0),
    )
    .map_err(|e| EmoscanError::Storage(format!("Failed to query migration version: {}", e)))
}

fn drop_all(conn: &Connection) -> Result<(), EmoscanError> {
    conn.execute_batch(
        "DROP TABLE IF EXISTS analysis_history;
         DROP TABLE IF EXISTS preferences;
         DELETE FROM schema_migrations;",
    )
    .map_err(|e| EmoscanError::Storage(format!("Failed to drop tables: {}", e)))
}

/// Version 1: analysis history and preferences.
fn apply_v1(conn: &Connection) -> Result<(), EmoscanError> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS analysis_history (
            id                  INTEGER PRIMARY KEY AUTOINCREMENT,
            filename            TEXT NOT NULL,
            file_path           TEXT NOT NULL,
            media_type          TEXT NOT NULL,
            dominant_emotion    TEXT NOT NULL,
            emotion_id          INTEGER NOT NULL,
            confidence          REAL NOT NULL,
            probabilities       TEXT NOT NULL DEFAULT '{}',
            analysis_date       INTEGER NOT NULL,
            description         TEXT NOT NULL DEFAULT '',
            audio_features      TEXT NOT NULL DEFAULT '[]',
            video_features      TEXT NOT NULL DEFAULT '[]',
            image_features      TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_history_date
            ON analysis_history (analysis_date DESC, id DESC);

        CREATE INDEX IF NOT EXISTS idx_history_media_type
            ON analysis_history (media_type, analysis_date DESC);

        CREATE INDEX IF NOT EXISTS idx_history_emotion
            ON analysis_history (dominant_emotion, analysis_date DESC);

        CREATE TABLE IF NOT EXISTS preferences (
            key         TEXT PRIMARY KEY NOT NULL,
            value       TEXT NOT NULL,
            updated_at  INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        );

        INSERT OR IGNORE INTO schema_migrations (version, name) VALUES (1, 'analysis_history');
        ",
    )
    .map_err(|e| EmoscanError::Storage(format!("Failed to apply migration v1: {}", e)))?;

    Ok(())
}
