//! SQLite Database
//!
//! Embedded database for the durable memory backend using rusqlite with r2d2
//! connection pooling. The pool holds a single long-lived connection: loadable
//! extensions and FTS availability are per-connection state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension};

use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::ensure_parent_dir;

/// Type alias for the connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Pooled connection handle
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Key/value table holding the schema version, vector marker and feature flags
pub const META_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS memory_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at INTEGER NOT NULL DEFAULT 0
)";

/// How long a caller waits for the single pooled connection before failing
pub const CONNECTION_TIMEOUT: Duration = Duration::from_secs(2);

const CONNECTION_PRAGMAS: &str = "PRAGMA journal_mode = WAL;
     PRAGMA synchronous = NORMAL;
     PRAGMA foreign_keys = ON;";

/// Database service for managing SQLite operations
#[derive(Clone)]
pub struct Database {
    pool: DbPool,
    path: Option<PathBuf>,
}

impl Database {
    /// Open (or create) a database file.
    ///
    /// Parent directories are created owner-only; every pooled connection gets
    /// WAL journaling and foreign-key enforcement.
    pub fn open(path: &Path) -> AppResult<Self> {
        ensure_parent_dir(path)?;

        let manager = SqliteConnectionManager::file(path)
            .with_init(|conn| conn.execute_batch(CONNECTION_PRAGMAS));
        let db = Self {
            pool: Self::build_pool(manager)?,
            path: Some(path.to_path_buf()),
        };
        db.bootstrap()?;
        Ok(db)
    }

    /// Create an in-memory database for testing.
    pub fn new_in_memory() -> AppResult<Self> {
        let manager = SqliteConnectionManager::memory()
            .with_init(|conn| conn.execute_batch("PRAGMA foreign_keys = ON;"));
        let db = Self {
            pool: Self::build_pool(manager)?,
            path: None,
        };
        db.bootstrap()?;
        Ok(db)
    }

    fn build_pool(manager: SqliteConnectionManager) -> AppResult<DbPool> {
        // Connections are never recycled so per-connection state survives
        Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(CONNECTION_TIMEOUT)
            .build(manager)
            .map_err(|e| AppError::database(format!("Failed to create connection pool: {}", e)))
    }

    fn bootstrap(&self) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute(META_TABLE_SQL, [])?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> AppResult<DbConnection> {
        self.pool
            .get()
            .map_err(|e| AppError::database(format!("Failed to get connection: {}", e)))
    }

    /// Database file path (`None` for in-memory databases)
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Check if the database is healthy
    pub fn is_healthy(&self) -> bool {
        if let Ok(conn) = self.pool.get() {
            conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
        } else {
            false
        }
    }

    /// Get a meta value by key
    pub fn get_meta(&self, key: &str) -> AppResult<Option<String>> {
        let conn = self.get_connection()?;
        read_meta(&conn, key)
    }

    /// Set a meta value
    pub fn set_meta(&self, key: &str, value: &str) -> AppResult<()> {
        let conn = self.get_connection()?;
        write_meta(&conn, key, value)
    }

    /// Delete a meta value
    pub fn delete_meta(&self, key: &str) -> AppResult<()> {
        let conn = self.get_connection()?;
        conn.execute("DELETE FROM memory_meta WHERE key = ?1", params![key])?;
        Ok(())
    }
}

/// Read a meta value on an existing connection (or transaction)
pub fn read_meta(conn: &Connection, key: &str) -> AppResult<Option<String>> {
    let value = conn
        .query_row(
            "SELECT value FROM memory_meta WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value)
}

/// Upsert a meta value on an existing connection (or transaction)
pub fn write_meta(conn: &Connection, key: &str, value: &str) -> AppResult<()> {
    conn.execute(
        "INSERT INTO memory_meta (key, value, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        params![key, value, chrono::Utc::now().timestamp_millis()],
    )?;
    Ok(())
}

/// Check whether a table has a given column (via PRAGMA table_info).
pub fn table_has_column(conn: &Connection, table: &str, column: &str) -> bool {
    let sql = format!("PRAGMA table_info({})", table);
    if let Ok(mut stmt) = conn.prepare(&sql) {
        if let Ok(rows) = stmt.query_map([], |row| row.get::<_, String>(1)) {
            for row in rows.flatten() {
                if row == column {
                    return true;
                }
            }
        }
    }
    false
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("path", &self.path)
            .field("pool_size", &self.pool.state().connections)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_health() {
        let db = Database::new_in_memory().unwrap();
        assert!(db.is_healthy());
        assert!(db.path().is_none());
    }

    #[test]
    fn test_checkout_times_out_while_connection_held() {
        let db = Database::new_in_memory().unwrap();
        let held = db.get_connection().unwrap();

        let started = std::time::Instant::now();
        let err = db.get_connection().err().unwrap();
        assert!(matches!(err, AppError::Database(_)));
        assert!(started.elapsed() < CONNECTION_TIMEOUT * 5);

        drop(held);
        assert!(db.get_connection().is_ok());
    }

    #[test]
    fn test_meta_crud() {
        let db = Database::new_in_memory().unwrap();

        db.set_meta("schema_version", "1").unwrap();
        assert_eq!(db.get_meta("schema_version").unwrap(), Some("1".to_string()));

        db.set_meta("schema_version", "3").unwrap();
        assert_eq!(db.get_meta("schema_version").unwrap(), Some("3".to_string()));

        db.delete_meta("schema_version").unwrap();
        assert!(db.get_meta("schema_version").unwrap().is_none());
    }

    #[test]
    fn test_open_file_enables_wal() {
        let temp_dir = tempfile::tempdir().unwrap();
        let path = temp_dir.path().join("data").join("memory.db");
        let db = Database::open(&path).unwrap();
        assert!(path.exists());

        let conn = db.get_connection().unwrap();
        let mode: String = conn
            .query_row("PRAGMA journal_mode", [], |row| row.get(0))
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");
        let fk: i64 = conn.query_row("PRAGMA foreign_keys", [], |row| row.get(0)).unwrap();
        assert_eq!(fk, 1);
    }

    #[test]
    fn test_table_has_column() {
        let db = Database::new_in_memory().unwrap();
        let conn = db.get_connection().unwrap();
        assert!(table_has_column(&conn, "memory_meta", "value"));
        assert!(!table_has_column(&conn, "memory_meta", "missing"));
        assert!(!table_has_column(&conn, "no_such_table", "value"));
    }
}
