//! Schema Migrations
//!
//! Forward-only, ordered migrations for the durable memory backend. The
//! current version lives in `memory_meta.schema_version`; every migration runs
//! in its own transaction together with the version bump, so a crash leaves
//! the schema at the last fully applied version.

use rusqlite::Connection;

use crate::storage::database::{read_meta, table_has_column, write_meta, META_TABLE_SQL};
use crate::utils::error::{AppError, AppResult};

pub const SCHEMA_VERSION_KEY: &str = "schema_version";

/// A single schema step
pub struct Migration {
    pub version: u32,
    pub name: &'static str,
    pub up: fn(&Connection) -> rusqlite::Result<()>,
}

/// Outcome of a migration run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationReport {
    /// Names of migrations applied by this run, in order
    pub applied: Vec<String>,
    /// Schema version after the run
    pub current: u32,
}

/// Applies pending migrations in version order
pub struct MigrationRunner {
    migrations: Vec<Migration>,
}

impl MigrationRunner {
    pub fn new(mut migrations: Vec<Migration>) -> Self {
        migrations.sort_by_key(|m| m.version);
        Self { migrations }
    }

    /// Migrations for the memory record store
    pub fn memory_schema() -> Self {
        Self::new(vec![
            Migration {
                version: 1,
                name: "create_memory_records",
                up: create_memory_records,
            },
            Migration {
                version: 2,
                name: "create_memory_trace",
                up: create_memory_trace,
            },
            Migration {
                version: 3,
                name: "add_node_version_column",
                up: add_node_version_column,
            },
        ])
    }

    /// Highest version this runner knows about
    pub fn latest_version(&self) -> u32 {
        self.migrations.last().map(|m| m.version).unwrap_or(0)
    }

    /// Stored schema version (0 when nothing has run yet)
    pub fn current_version(conn: &Connection) -> AppResult<u32> {
        conn.execute(META_TABLE_SQL, [])?;
        match read_meta(conn, SCHEMA_VERSION_KEY)? {
            Some(raw) => raw.parse::<u32>().map_err(|_| {
                AppError::database(format!("Corrupt schema_version marker: {}", raw))
            }),
            None => Ok(0),
        }
    }

    /// Apply every migration newer than the stored version.
    pub fn run(&self, conn: &mut Connection) -> AppResult<MigrationReport> {
        let start = Self::current_version(conn)?;
        let mut current = start;
        let mut applied = Vec::new();

        for migration in self.migrations.iter().filter(|m| m.version > start) {
            let tx = conn.transaction()?;
            (migration.up)(&tx).map_err(|e| {
                AppError::database(format!("Migration {} failed: {}", migration.name, e))
            })?;
            write_meta(&tx, SCHEMA_VERSION_KEY, &migration.version.to_string())?;
            tx.commit()?;

            tracing::info!(
                "[Migrations] Applied {} (version {})",
                migration.name,
                migration.version
            );
            current = migration.version;
            applied.push(migration.name.to_string());
        }

        Ok(MigrationReport { applied, current })
    }
}

// ============================================================================
// Memory schema
// ============================================================================

fn create_memory_records(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_records (
            id TEXT PRIMARY KEY,
            created_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            domain TEXT NOT NULL,
            source_id TEXT NOT NULL,
            agent_id TEXT,
            user_id TEXT,
            session_key TEXT,
            project TEXT,
            role TEXT,
            org TEXT,
            scope_level TEXT,
            tags_json TEXT NOT NULL DEFAULT '[]',
            confidence REAL NOT NULL DEFAULT 1.0,
            expires_at INTEGER,
            fingerprint TEXT NOT NULL,
            data_json TEXT NOT NULL,
            data_text TEXT NOT NULL DEFAULT '',
            embedding BLOB
        );
        CREATE INDEX IF NOT EXISTS idx_memory_records_created_at ON memory_records(created_at DESC);
        CREATE INDEX IF NOT EXISTS idx_memory_records_session ON memory_records(session_key);
        CREATE INDEX IF NOT EXISTS idx_memory_records_project ON memory_records(project);
        CREATE INDEX IF NOT EXISTS idx_memory_records_role ON memory_records(role);
        CREATE INDEX IF NOT EXISTS idx_memory_records_org ON memory_records(org);
        CREATE INDEX IF NOT EXISTS idx_memory_records_source ON memory_records(source_id);
        CREATE INDEX IF NOT EXISTS idx_memory_records_user ON memory_records(user_id);
        CREATE INDEX IF NOT EXISTS idx_memory_records_fingerprint ON memory_records(fingerprint);",
    )
}

fn create_memory_trace(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memory_trace (
            id TEXT PRIMARY KEY,
            ts INTEGER NOT NULL,
            kind TEXT NOT NULL,
            session_key TEXT,
            data_json TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_memory_trace_ts ON memory_trace(ts DESC);
        CREATE INDEX IF NOT EXISTS idx_memory_trace_kind ON memory_trace(kind);
        CREATE INDEX IF NOT EXISTS idx_memory_trace_session ON memory_trace(session_key);",
    )
}

fn add_node_version_column(conn: &Connection) -> rusqlite::Result<()> {
    if !table_has_column(conn, "memory_records", "node_version") {
        conn.execute(
            "ALTER TABLE memory_records ADD COLUMN node_version INTEGER NOT NULL DEFAULT 1",
            [],
        )?;
    }
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_memory_records_expires_at ON memory_records(expires_at)",
        [],
    )?;
    Ok(())
}
