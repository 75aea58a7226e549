//! Database connection management.
//!
//! One writer connection behind a Mutex serializes every write. File-backed
//! databases also open a small pool of read-only connections; in WAL mode
//! those see the last committed state without waiting for the writer.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use rusqlite::{Connection, OpenFlags};
use tracing::{debug, info};

use emoscan_core::error::EmoscanError;

use crate::migrations;

const DEFAULT_READERS: usize = 2;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Thread-safe SQLite database wrapper.
pub struct Database {
    writer: Mutex<Connection>,
    /// Empty for in-memory databases; reads then go through the writer.
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl Database {
    /// Open (or create) a database at the given path with the default reader
    /// pool size.
    pub fn new(path: &Path) -> Result<Self, EmoscanError> {
        Self::with_readers(path, DEFAULT_READERS)
    }

    /// Open (or create) a database at the given path.
    ///
    /// Configures WAL mode and synchronous=NORMAL, runs pending migrations on
    /// the writer, then opens `reader_count` read-only connections.
    pub fn with_readers(path: &Path, reader_count: usize) -> Result<Self, EmoscanError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(path)
            .map_err(|e| EmoscanError::Storage(format!("Failed to open database: {}", e)))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;",
        )
        .map_err(|e| EmoscanError::Storage(format!("Failed to set pragmas: {}", e)))?;
        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| EmoscanError::Storage(format!("Failed to set busy timeout: {}", e)))?;

        migrations::run_migrations(&conn)?;

        let mut readers = Vec::with_capacity(reader_count);
        for _ in 0..reader_count {
            let reader = Connection::open_with_flags(
                path,
                OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
            .map_err(|e| EmoscanError::Storage(format!("Failed to open reader: {}", e)))?;
            reader
                .busy_timeout(BUSY_TIMEOUT)
                .map_err(|e| EmoscanError::Storage(e.to_string()))?;
            readers.push(Mutex::new(reader));
        }

        info!(
            path = %path.display(),
            readers = reader_count,
            "Database opened"
        );

        Ok(Self {
            writer: Mutex::new(conn),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self, EmoscanError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| EmoscanError::Storage(format!("Failed to open in-memory db: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| EmoscanError::Storage(format!("Failed to set pragmas: {}", e)))?;

        migrations::run_migrations(&conn)?;

        Ok(Self {
            writer: Mutex::new(conn),
            readers: Vec::new(),
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Execute a closure with the writer connection.
    ///
    /// Every mutation goes through here, so writers are serialized. The mutex
    /// is held for the duration of the closure.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, EmoscanError>
    where
        F: FnOnce(&Connection) -> Result<T, EmoscanError>,
    {
        let conn = lock(&self.writer)?;
        f(&conn)
    }

    /// Execute a read-only closure.
    ///
    /// Picks an idle reader if there is one, otherwise waits on the next
    /// reader in rotation. Falls back to the writer when there is no pool.
    pub fn with_reader<F, T>(&self, f: F) -> Result<T, EmoscanError>
    where
        F: FnOnce(&Connection) -> Result<T, EmoscanError>,
    {
        if self.readers.is_empty() {
            return self.with_conn(f);
        }

        for reader in &self.readers {
            if let Ok(conn) = reader.try_lock() {
                return f(&conn);
            }
        }

        let idx = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        debug!(reader = idx, "All readers busy, waiting");
        let conn = lock(&self.readers[idx])?;
        f(&conn)
    }

    /// Number of read-only connections in the pool.
    pub fn reader_count(&self) -> usize {
        self.readers.len()
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>, EmoscanError> {
    conn.lock()
        .map_err(|e| EmoscanError::Storage(format!("Database lock poisoned: {}", e)))
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("readers", &self.readers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn count_rows(conn: &Connection) -> Result<i64, EmoscanError> {
        conn.query_row("SELECT COUNT(*) FROM analysis_history", [], |row| row.get(0))
            .map_err(|e| EmoscanError::Storage(e.to_string()))
    }

    #[test]
    fn test_in_memory_database() {
        let db = Database::in_memory().unwrap();
        assert_eq!(db.reader_count(), 0);
        assert_eq!(db.with_conn(count_rows).unwrap(), 0);
        // Reads fall back to the writer.
        assert_eq!(db.with_reader(count_rows).unwrap(), 0);
    }

    #[test]
    fn test_file_database() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("test.db");
        let db = Database::new(&path).unwrap();

        assert_eq!(db.reader_count(), 2);
        assert_eq!(db.with_conn(count_rows).unwrap(), 0);
        assert!(path.exists());
    }

    #[test]
    fn test_readers_see_committed_writes() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::with_readers(&dir.path().join("r.db"), 1).unwrap();

        db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO analysis_history (filename, file_path, media_type, dominant_emotion,
                     emotion_id, confidence, probabilities, analysis_date)
                 VALUES ('a.mp4', '/a.mp4', 'video', 'happy', 2, 0.9, '{}', 1)",
                [],
            )
            .map_err(|e| EmoscanError::Storage(e.to_string()))?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.with_reader(count_rows).unwrap(), 1);
    }

    #[test]
    fn test_readers_are_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::with_readers(&dir.path().join("ro.db"), 1).unwrap();
        let result = db.with_reader(|conn| {
            conn.execute("DELETE FROM analysis_history", [])
                .map_err(|e| EmoscanError::Storage(e.to_string()))
        });
        assert!(result.is_err());
    }

    #[test]
    fn test_wal_mode_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(&dir.path().join("wal.db")).unwrap();
        db.with_conn(|conn| {
            let mode: String = conn
                .query_row("PRAGMA journal_mode", [], |row| row.get(0))
                .map_err(|e| EmoscanError::Storage(e.to_string()))?;
            assert_eq!(mode, "wal");
            Ok(())
        })
        .unwrap();
    }
}
