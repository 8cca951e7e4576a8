//! SQLite-backed storage for the skald daemon.
//!
//! One database file (`skald.db`, WAL mode) holds the analysis job queue,
//! the versioned analysis nodes, and the per-session watermarks. Every
//! daemon component that needs persistence opens its own `SqliteStore`;
//! there is no shared connection or global handle.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::queue::QueueConfig;

const SCHEMA_SQL: &str = "
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;

CREATE TABLE IF NOT EXISTS jobs (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    priority INTEGER NOT NULL,
    session_file TEXT NOT NULL,
    segment_start TEXT,
    segment_end TEXT,
    context TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending',
    queued_at TEXT NOT NULL,
    started_at TEXT,
    completed_at TEXT,
    result_node_id TEXT,
    error TEXT,
    retry_count INTEGER NOT NULL DEFAULT 0,
    max_retries INTEGER NOT NULL DEFAULT 3,
    worker_id TEXT,
    lease_expiry INTEGER
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_priority ON jobs(status, priority);

CREATE TABLE IF NOT EXISTS nodes (
    id TEXT NOT NULL,
    version INTEGER NOT NULL,
    analyzer_version INTEGER NOT NULL,
    session_file TEXT NOT NULL,
    segment_start TEXT,
    segment_end TEXT,
    payload TEXT NOT NULL,
    analyzed_at TEXT NOT NULL,
    last_connection_at TEXT,
    PRIMARY KEY (id, version)
);

CREATE INDEX IF NOT EXISTS idx_nodes_analyzed ON nodes(analyzed_at);

CREATE TABLE IF NOT EXISTS watermarks (
    session_file TEXT PRIMARY KEY,
    analyzed_until INTEGER NOT NULL,
    last_entry_id TEXT,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

/// SQLite-backed storage engine.
///
/// The connection sits behind a mutex: workers hold their store across
/// await points, which needs `Sync`. Every component opens its own
/// store, so the lock is uncontended.
pub struct SqliteStore {
    conn: Mutex<rusqlite::Connection>,
    pub(crate) queue: QueueConfig,
}

impl SqliteStore {
    /// Open an existing database without touching the schema.
    pub fn open(db_path: &Path) -> anyhow::Result<Self> {
        let conn = rusqlite::Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            queue: QueueConfig::default(),
        };
        store.apply_pragmas()?;
        Ok(store)
    }

    /// Open or create the database with the full schema.
    pub fn open_or_create(db_path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(db_path)?;
        let store = Self {
            conn: Mutex::new(conn),
            queue: QueueConfig::default(),
        };
        store.apply_pragmas()?;
        store.apply_schema()?;
        Ok(store)
    }

    /// Replace the queue tuning (backpressure limit, lease, retry policy).
    pub fn with_queue_config(mut self, config: QueueConfig) -> Self {
        self.queue = config;
        self
    }

    /// A poisoned lock yields the inner connection rather than panicking.
    pub(crate) fn conn(&self) -> MutexGuard<'_, rusqlite::Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn apply_pragmas(&self) -> anyhow::Result<()> {
        self.conn().execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    fn apply_schema(&self) -> anyhow::Result<()> {
        // Idempotent via IF NOT EXISTS
        let conn = self.conn();
        conn.execute_batch(SCHEMA_SQL)?;
        conn.execute(
            "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('version', '1')",
            [],
        )?;
        Ok(())
    }

    /// Current schema version from `schema_meta`.
    pub fn schema_version(&self) -> anyhow::Result<u32> {
        let version_str: String = self
            .conn()
            .query_row(
                "SELECT value FROM schema_meta WHERE key = 'version'",
                [],
                |row| row.get(0),
            )
            .unwrap_or_else(|_| "1".to_string());
        Ok(version_str.parse().unwrap_or(1))
    }
}

impl Drop for SqliteStore {
    fn drop(&mut self) {
        // Merge WAL back into the main DB so users see a single file when idle.
        let _ = self.conn().execute_batch("PRAGMA wal_checkpoint(TRUNCATE);");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_store() -> (tempfile::TempDir, SqliteStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteStore::open_or_create(&dir.path().join("skald.db")).unwrap();
        (dir, store)
    }

    #[test]
    fn schema_creation() {
        let (_dir, store) = tmp_store();
        let conn = store.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"jobs".to_string()));
        assert!(tables.contains(&"nodes".to_string()));
        assert!(tables.contains(&"watermarks".to_string()));
        assert!(tables.contains(&"schema_meta".to_string()));
    }

    #[test]
    fn schema_version_bootstrapped() {
        let (_dir, store) = tmp_store();
        assert_eq!(store.schema_version().unwrap(), 1);
    }

    #[test]
    fn idempotent_schema_apply() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("skald.db");

        let store1 = SqliteStore::open_or_create(&db_path).unwrap();
        drop(store1);

        // Reopening must not error or reset the version.
        let store2 = SqliteStore::open_or_create(&db_path).unwrap();
        assert_eq!(store2.schema_version().unwrap(), 1);
    }

    #[test]
    fn wal_checkpoint_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("skald.db");

        {
            let store = SqliteStore::open_or_create(&db_path).unwrap();
            store
                .conn()
                .execute(
                    "INSERT INTO watermarks (session_file, analyzed_until, updated_at)
                     VALUES ('s.jsonl', 0, '2026-01-01T00:00:00Z')",
                    [],
                )
                .unwrap();
            // Drop triggers checkpoint
        }

        assert!(db_path.exists());
        let wal_path = dir.path().join("skald.db-wal");
        if wal_path.exists() {
            let size = std::fs::metadata(&wal_path).unwrap().len();
            assert_eq!(size, 0, "WAL file should be empty after checkpoint");
        }
    }
}
