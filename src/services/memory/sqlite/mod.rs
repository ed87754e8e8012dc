//! SQLite Memory Backend
//!
//! Durable `MemoryService` over an embedded SQLite file. Nodes are stored as a
//! JSON blob plus flattened, indexed columns for filtering and a redacted
//! search-text column. Full-text (FTS5) and vector (sqlite-vec) search are
//! optional: when either is missing the backend degrades to `LIKE` scans or
//! no-ops instead of failing.
//!
//! ## Module Structure
//!
//! - `records` - row codec, record/trace queries
//! - `transaction` - `MemoryTransaction`
//! - `vector` - vector extension loading and KNN search

pub mod records;
pub mod transaction;
pub mod vector;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Instant;

use agent_memory_core::{
    can_read, matches_keywords, qualifies_for_delete, MemoryFilters, MemoryNode,
    MemorySearchResult, MetadataInput, Scope, ScopeLevel,
};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::service::{
    collect_scoped, compaction_victims, rank_candidates, resolve_limit, CompactionEntry,
    DeleteScopeOptions, Embedder, MemoryService, NodeFactory, ScopedRetrieveOptions, StoreItem,
};
use crate::models::settings::MemoryConfig;
use crate::storage::database::{Database, DbConnection};
use crate::storage::migrations::MigrationRunner;
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::database_path;

pub use records::{
    bytes_to_embedding, embedding_to_bytes, fingerprint_hash, RecordHit, RecordQueryFilters,
    TraceEvent,
};
pub use transaction::MemoryTransaction;
pub use vector::{VectorIndex, VectorLoadResult, VectorMatch};

use records::{
    delete_nodes, get_node, insert_node, insert_trace, level_column, live_clause, nodes_at_level,
    query_filtered, query_traces, row_scope, search_fts, search_like, select_nodes, table_exists,
    FTS_TABLE,
};

// ============================================================================
// Limits
// ============================================================================

const SEARCH_LIMIT: (usize, usize) = (20, 100);
const DATE_RANGE_LIMIT: (usize, usize) = (50, 500);
const SESSION_LIMIT: (usize, usize) = (200, 500);
const SOURCE_LIMIT: (usize, usize) = (200, 500);
const RECENT_LIMIT: (usize, usize) = (20, 200);
const SESSION_LIST_LIMIT: (usize, usize) = (50, 500);
const TRACE_LIMIT: (usize, usize) = (2000, 50_000);

/// `limit` (or the default) clamped to `[1, max]`
fn clamp_limit(limit: Option<usize>, (default, max): (usize, usize)) -> usize {
    limit.unwrap_or(default).clamp(1, max)
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

// ============================================================================
// Introspection types
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthDetails {
    pub db_path: Option<String>,
    pub fts_available: bool,
    pub vector_available: bool,
    pub schema_version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthCheck {
    pub status: HealthStatus,
    pub latency_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<HealthDetails>,
}

/// Result of (re)creating the full-text table
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FtsStatus {
    pub fts_available: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fts_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryStats {
    pub record_count: usize,
    pub trace_count: usize,
    pub session_count: usize,
    pub oldest_record: Option<i64>,
    pub newest_record: Option<i64>,
    pub schema_version: u32,
}

/// Per-source usage aggregate
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolStats {
    pub source_id: String,
    pub count: usize,
    pub avg_confidence: f64,
    pub last_used: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionListItem {
    pub session_key: String,
    pub record_count: usize,
    pub first_ts: i64,
    pub last_ts: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_key: String,
    pub started_at: i64,
    pub ended_at: i64,
    /// Distinct `sourceId`s that wrote into the session
    pub sources: Vec<String>,
    pub record_count: usize,
}

// ============================================================================
// Backend
// ============================================================================

/// Durable `MemoryService` backend.
///
/// Every method other than `init` fails with `NotInitialized` until `init`
/// has run (and again after `close`).
pub struct SqliteMemoryBackend {
    /// `None` for an in-memory database
    db_path: Option<PathBuf>,
    factory: NodeFactory,
    max_results: usize,
    enable_vector: bool,
    vector_extension_path: Option<PathBuf>,
    db: RwLock<Option<Database>>,
    fts_available: AtomicBool,
    vector: RwLock<Option<VectorIndex>>,
    schema_version: AtomicU32,
}

impl SqliteMemoryBackend {
    /// Backend for `config.db_path`, or ~/.agent-memory/memory.db.
    pub fn new(config: &MemoryConfig) -> AppResult<Self> {
        let path = match config.db_path {
            Some(ref path) => path.clone(),
            None => database_path()?,
        };
        Ok(Self::with_location(config, Some(path)))
    }

    /// Backend over a private in-memory database.
    pub fn in_memory(config: &MemoryConfig) -> Self {
        Self::with_location(config, None)
    }

    fn with_location(config: &MemoryConfig, db_path: Option<PathBuf>) -> Self {
        Self {
            db_path,
            factory: NodeFactory::new(config),
            max_results: config.max_results,
            enable_vector: config.enable_vector,
            vector_extension_path: config.vector_extension_path.clone(),
            db: RwLock::new(None),
            fts_available: AtomicBool::new(false),
            vector: RwLock::new(None),
            schema_version: AtomicU32::new(0),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.factory = self.factory.with_embedder(embedder);
        self
    }

    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    pub fn fts_available(&self) -> bool {
        self.fts_available.load(Ordering::SeqCst)
    }

    pub fn vector_available(&self) -> bool {
        self.vector_index().is_some()
    }

    pub fn is_initialized(&self) -> bool {
        self.db.read().map(|db| db.is_some()).unwrap_or(false)
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Open the database, run migrations, set up full-text search and, when
    /// configured, the vector extension. Idempotent.
    pub fn init(&self) -> AppResult<()> {
        if self.is_initialized() {
            return Ok(());
        }

        vector::register_bundled();
        let db = match self.db_path {
            Some(ref path) => Database::open(path)?,
            None => Database::new_in_memory()?,
        };
        {
            let mut conn = db.get_connection()?;
            self.migrate_and_index(&mut conn)?;
        }
        *self
            .db
            .write()
            .map_err(|_| AppError::internal("database lock poisoned"))? = Some(db);

        tracing::info!(
            "[SqliteMemory] Initialized {} (schema v{}, fts={})",
            self.display_path(),
            self.schema_version.load(Ordering::SeqCst),
            self.fts_available()
        );

        if self.enable_vector {
            let path = self.vector_extension_path.clone();
            let result = self.load_vector_extension(path.as_deref(), None)?;
            if !result.ok {
                tracing::warn!(
                    "[SqliteMemory] Vector search disabled: {}",
                    result.error.unwrap_or_default()
                );
            }
        }
        Ok(())
    }

    /// Re-run migrations and full-text setup on an open database.
    pub fn ensure_schema(&self) -> AppResult<FtsStatus> {
        let db = self.database()?;
        let mut conn = db.get_connection()?;
        self.migrate_and_index(&mut conn)
    }

    fn migrate_and_index(&self, conn: &mut Connection) -> AppResult<FtsStatus> {
        let report = MigrationRunner::memory_schema().run(conn)?;
        if !report.applied.is_empty() {
            tracing::info!(
                "[SqliteMemory] Applied migrations: {} (v{})",
                report.applied.join(", "),
                report.current
            );
        }
        self.schema_version.store(report.current, Ordering::SeqCst);

        let status = ensure_fts(conn);
        self.fts_available
            .store(status.fts_available, Ordering::SeqCst);
        if let Some(ref err) = status.fts_error {
            tracing::warn!("[SqliteMemory] Full-text search unavailable: {}", err);
        }
        Ok(status)
    }

    /// Drop the connection. `init` may be called again afterwards.
    pub fn close(&self) -> AppResult<()> {
        self.db
            .write()
            .map_err(|_| AppError::internal("database lock poisoned"))?
            .take();
        if let Ok(mut vector) = self.vector.write() {
            *vector = None;
        }
        self.fts_available.store(false, Ordering::SeqCst);
        Ok(())
    }

    pub fn health_check(&self) -> HealthCheck {
        let start = Instant::now();
        let probe = self.database().and_then(|db| {
            let conn = db.get_connection()?;
            conn.query_row("SELECT 1", [], |_| Ok(()))?;
            Ok(())
        });
        let latency_ms = start.elapsed().as_secs_f64() * 1000.0;

        match probe {
            Ok(()) => HealthCheck {
                status: HealthStatus::Healthy,
                latency_ms,
                message: None,
                details: Some(HealthDetails {
                    db_path: self.db_path.as_ref().map(|p| p.display().to_string()),
                    fts_available: self.fts_available(),
                    vector_available: self.vector_available(),
                    schema_version: self.schema_version.load(Ordering::SeqCst),
                }),
            },
            Err(e) => HealthCheck {
                status: HealthStatus::Unhealthy,
                latency_ms,
                message: Some(e.to_string()),
                details: None,
            },
        }
    }

    fn database(&self) -> AppResult<Database> {
        self.db
            .read()
            .map_err(|_| AppError::internal("database lock poisoned"))?
            .clone()
            .ok_or_else(|| {
                AppError::not_initialized("SQLite memory backend not initialized. Call init() first.")
            })
    }

    fn connection(&self) -> AppResult<DbConnection> {
        self.database()?.get_connection()
    }

    fn vector_index(&self) -> Option<VectorIndex> {
        self.vector.read().ok().and_then(|v| *v)
    }

    fn display_path(&self) -> String {
        self.db_path
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| ":memory:".to_string())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a transaction. It holds the only pooled connection: other calls
    /// wait for it and fail with `Database` after `CONNECTION_TIMEOUT`.
    pub fn begin_transaction(&self) -> AppResult<MemoryTransaction> {
        let conn = self.connection()?;
        MemoryTransaction::begin(conn, self.fts_available())
    }

    /// Run `f` in a transaction: commit on `Ok`, roll back and return the
    /// error on `Err`.
    ///
    /// `f` must do all of its work through `tx`. Calling other methods of this
    /// backend from inside `f` waits on the connection `tx` holds and fails
    /// once the pool checkout times out.
    pub fn with_transaction<T, F>(&self, f: F) -> AppResult<T>
    where
        F: FnOnce(&mut MemoryTransaction) -> AppResult<T>,
    {
        let mut tx = self.begin_transaction()?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(e) => {
                tx.rollback()?;
                Err(e)
            }
        }
    }

    // ========================================================================
    // Raw record & trace writes
    // ========================================================================

    /// Idempotent insert of a fully built node; `false` if the id exists.
    pub fn insert_record(&self, node: &MemoryNode) -> AppResult<bool> {
        let conn = self.connection()?;
        insert_node(&conn, node, self.fts_available())
    }

    /// Insert nodes in one transaction; returns how many were new.
    pub fn insert_records_batch(&self, nodes: &[MemoryNode]) -> AppResult<usize> {
        if nodes.is_empty() {
            return Ok(0);
        }
        self.with_transaction(|tx| tx.insert_records_batch(nodes))
            .map_err(as_transaction_failure)
    }

    pub fn insert_trace_event(&self, event: &TraceEvent) -> AppResult<bool> {
        let conn = self.connection()?;
        insert_trace(&conn, event)
    }

    pub fn insert_trace_events_batch(&self, events: &[TraceEvent]) -> AppResult<usize> {
        if events.is_empty() {
            return Ok(0);
        }
        self.with_transaction(|tx| tx.insert_trace_events_batch(events))
            .map_err(as_transaction_failure)
    }

    // ========================================================================
    // Record queries
    // ========================================================================

    pub fn get_record_by_id(&self, id: &str) -> AppResult<Option<MemoryNode>> {
        let conn = self.connection()?;
        get_node(&conn, id, now_ms())
    }

    /// Full-text search ranked by bm25, falling back to a `LIKE` scan.
    pub fn search_records(
        &self,
        query: &str,
        filters: &RecordQueryFilters,
    ) -> AppResult<Vec<RecordHit>> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(filters.limit, SEARCH_LIMIT);
        let now = now_ms();
        let conn = self.connection()?;

        if self.fts_available() && table_exists(&conn, FTS_TABLE) {
            match search_fts(&conn, trimmed, filters, now, limit) {
                Ok(hits) => return Ok(hits),
                Err(e) => {
                    tracing::debug!("[SqliteMemory] FTS query failed, using LIKE: {}", e)
                }
            }
        }
        search_like(&conn, trimmed, filters, now, limit)
    }

    pub fn get_records_by_date_range(
        &self,
        from: i64,
        to: i64,
        filters: &RecordQueryFilters,
    ) -> AppResult<Vec<MemoryNode>> {
        let limit = clamp_limit(filters.limit, DATE_RANGE_LIMIT);
        let merged = RecordQueryFilters {
            from: Some(from),
            to: Some(to),
            ..filters.clone()
        };
        let conn = self.connection()?;
        query_filtered(&conn, &merged, now_ms(), limit)
    }

    pub fn get_records_by_session(
        &self,
        session_key: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemoryNode>> {
        let filters = RecordQueryFilters {
            session_key: Some(session_key.to_string()),
            ..Default::default()
        };
        let conn = self.connection()?;
        query_filtered(&conn, &filters, now_ms(), clamp_limit(limit, SESSION_LIMIT))
    }

    /// Records written by one source (the "tool" of a record).
    pub fn get_records_by_source(
        &self,
        source_id: &str,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemoryNode>> {
        let filters = RecordQueryFilters {
            source_id: Some(source_id.to_string()),
            ..Default::default()
        };
        let conn = self.connection()?;
        query_filtered(&conn, &filters, now_ms(), clamp_limit(limit, SOURCE_LIMIT))
    }

    pub fn get_recent_records(
        &self,
        limit: Option<usize>,
        filters: &RecordQueryFilters,
    ) -> AppResult<Vec<MemoryNode>> {
        let conn = self.connection()?;
        query_filtered(&conn, filters, now_ms(), clamp_limit(limit, RECENT_LIMIT))
    }

    pub fn get_trace_events_by_date_range(
        &self,
        from: i64,
        to: i64,
        kind: Option<&str>,
        limit: Option<usize>,
    ) -> AppResult<Vec<TraceEvent>> {
        let conn = self.connection()?;
        query_traces(&conn, from, to, kind, clamp_limit(limit, TRACE_LIMIT))
    }

    // ========================================================================
    // Stats & meta
    // ========================================================================

    pub fn get_stats(&self) -> AppResult<MemoryStats> {
        let conn = self.connection()?;
        let now = now_ms();
        let live = live_clause(1);

        let (record_count, oldest_record, newest_record) = conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN(r.created_at), MAX(r.created_at) FROM memory_records r WHERE {}",
                live
            ),
            params![now],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )?;
        let session_count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(DISTINCT r.session_key) FROM memory_records r
                 WHERE r.session_key IS NOT NULL AND {}",
                live
            ),
            params![now],
            |row| row.get(0),
        )?;
        let trace_count: i64 =
            conn.query_row("SELECT COUNT(*) FROM memory_trace", [], |row| row.get(0))?;

        Ok(MemoryStats {
            record_count: record_count as usize,
            trace_count: trace_count as usize,
            session_count: session_count as usize,
            oldest_record,
            newest_record,
            schema_version: self.schema_version.load(Ordering::SeqCst),
        })
    }

    /// Usage per `sourceId`, busiest first.
    pub fn get_tool_stats(&self) -> AppResult<Vec<ToolStats>> {
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT r.source_id, COUNT(*) AS cnt, AVG(r.confidence), MAX(r.created_at)
             FROM memory_records r
             WHERE {}
             GROUP BY r.source_id
             ORDER BY cnt DESC",
            live_clause(1)
        ))?;
        let stats = stmt
            .query_map(params![now_ms()], |row| {
                Ok(ToolStats {
                    source_id: row.get(0)?,
                    count: row.get::<_, i64>(1)? as usize,
                    avg_confidence: row.get::<_, Option<f64>>(2)?.unwrap_or(0.0),
                    last_used: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(stats)
    }

    /// Sessions ordered by most recent activity.
    pub fn list_sessions(
        &self,
        limit: Option<usize>,
        offset: usize,
    ) -> AppResult<Vec<SessionListItem>> {
        let limit = clamp_limit(limit, SESSION_LIST_LIMIT);
        let conn = self.connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT r.session_key, COUNT(*), MIN(r.created_at), MAX(r.created_at)
             FROM memory_records r
             WHERE r.session_key IS NOT NULL AND {}
             GROUP BY r.session_key
             ORDER BY MAX(r.created_at) DESC
             LIMIT ?2 OFFSET ?3",
            live_clause(1)
        ))?;
        let sessions = stmt
            .query_map(params![now_ms(), limit as i64, offset as i64], |row| {
                Ok(SessionListItem {
                    session_key: row.get(0)?,
                    record_count: row.get::<_, i64>(1)? as usize,
                    first_ts: row.get(2)?,
                    last_ts: row.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(sessions)
    }

    pub fn get_session_summary(&self, session_key: &str) -> AppResult<Option<SessionSummary>> {
        let conn = self.connection()?;
        let now = now_ms();
        let live = live_clause(2);

        let (record_count, started_at, ended_at) = conn.query_row(
            &format!(
                "SELECT COUNT(*), MIN(r.created_at), MAX(r.created_at) FROM memory_records r
                 WHERE r.session_key = ?1 AND {}",
                live
            ),
            params![session_key, now],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, Option<i64>>(1)?,
                    row.get::<_, Option<i64>>(2)?,
                ))
            },
        )?;
        let (Some(started_at), Some(ended_at)) = (started_at, ended_at) else {
            return Ok(None);
        };
        if record_count == 0 {
            return Ok(None);
        }

        let mut stmt = conn.prepare(&format!(
            "SELECT DISTINCT r.source_id FROM memory_records r
             WHERE r.session_key = ?1 AND {}
             ORDER BY r.source_id",
            live
        ))?;
        let sources = stmt
            .query_map(params![session_key, now], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(SessionSummary {
            session_key: session_key.to_string(),
            started_at,
            ended_at,
            sources,
            record_count: record_count as usize,
        }))
    }

    pub fn get_meta(&self, key: &str) -> AppResult<Option<String>> {
        self.database()?.get_meta(key)
    }

    pub fn set_meta(&self, key: &str, value: &str) -> AppResult<()> {
        self.database()?.set_meta(key, value)
    }

    // ========================================================================
    // Vector search
    // ========================================================================

    /// Load the vector extension and create the vector table.
    ///
    /// `dims` overrides the configured embedding dimensionality. Failures are
    /// reported in the result; only `NotInitialized` is returned as an error.
    pub fn load_vector_extension(
        &self,
        extension_path: Option<&Path>,
        dims: Option<usize>,
    ) -> AppResult<VectorLoadResult> {
        let conn = self.connection()?;
        let dims = dims.filter(|d| *d > 0).unwrap_or(self.factory.dimensions());

        let loaded = vector::load_extension(&conn, extension_path)
            .and_then(|_| vector::ensure_vec_table(&conn, dims));
        let index = loaded.as_ref().ok().map(|_| VectorIndex { dims });
        if let Ok(mut slot) = self.vector.write() {
            *slot = index;
        }

        Ok(match loaded {
            Ok(()) => VectorLoadResult {
                ok: true,
                error: None,
            },
            Err(e) => VectorLoadResult::failed(e),
        })
    }

    /// Upsert a record's embedding. `false` when vector search is unavailable
    /// or the length does not match.
    pub fn insert_embedding(&self, record_id: &str, embedding: &[f32]) -> AppResult<bool> {
        let Some(index) = self.vector_index() else {
            return Ok(false);
        };
        if embedding.len() != index.dims {
            return Ok(false);
        }
        let conn = self.connection()?;
        Ok(match vector::upsert_embedding(&conn, record_id, embedding) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("[SqliteMemory] Embedding insert failed for {}: {}", record_id, e);
                false
            }
        })
    }

    /// Nearest records by vector distance. Empty when unavailable or the
    /// length does not match.
    pub fn search_by_vector(&self, embedding: &[f32], limit: Option<usize>) -> AppResult<Vec<VectorMatch>> {
        let Some(index) = self.vector_index() else {
            return Ok(Vec::new());
        };
        if embedding.len() != index.dims {
            return Ok(Vec::new());
        }
        let limit = clamp_limit(limit, SEARCH_LIMIT);
        let conn = self.connection()?;
        Ok(vector::nearest(&conn, embedding, limit).unwrap_or_else(|e| {
            tracing::debug!("[SqliteMemory] Vector search failed: {}", e);
            Vec::new()
        }))
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn store_nodes(&self, nodes: &[MemoryNode]) -> AppResult<()> {
        self.with_transaction(|tx| tx.insert_records_batch(nodes))
            .map_err(as_transaction_failure)?;
        for node in nodes.iter().filter(|n| !n.embedding.is_empty()) {
            self.insert_embedding(&node.id, &node.embedding)?;
        }
        Ok(())
    }

    fn remove_ids(&self, conn: &mut Connection, ids: &[String]) -> AppResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }
        let tx = conn.transaction()?;
        let removed = delete_nodes(&tx, ids, self.fts_available(), self.vector_available())?;
        tx.commit()?;
        Ok(removed)
    }

    /// Live nodes matching the pushed-down parts of `filters`
    fn candidate_nodes(&self, conn: &Connection, filters: &MemoryFilters) -> AppResult<Vec<MemoryNode>> {
        let mut conditions = vec![live_clause(1)];
        let mut values = vec![Value::Integer(now_ms())];
        let mut push = |column: &str, value: Value| {
            values.push(value);
            conditions.push(format!("r.{} = ?{}", column, values.len()));
        };
        if let Some(domain) = filters.domain {
            push("domain", Value::Text(domain.as_str().to_string()));
        }
        if let Some(ref agent_id) = filters.agent_id {
            push("agent_id", Value::Text(agent_id.clone()));
        }
        if let Some(ref user_id) = filters.user_id {
            push("user_id", Value::Text(user_id.clone()));
        }
        if let Some(ref source_id) = filters.source_id {
            push("source_id", Value::Text(source_id.clone()));
        }
        select_nodes(conn, &format!("WHERE {}", conditions.join(" AND ")), values)
    }
}

/// Wrap a storage error from a rolled-back batch.
fn as_transaction_failure(err: AppError) -> AppError {
    match err {
        AppError::TransactionFailure(_) | AppError::NotInitialized(_) => err,
        other => AppError::transaction(format!("batch rolled back: {}", other)),
    }
}

/// Create the external-content FTS5 table; failure disables full-text search.
fn ensure_fts(conn: &Connection) -> FtsStatus {
    let existed = table_exists(conn, FTS_TABLE);
    let created = conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_records_fts USING fts5(
            source_id,
            domain,
            data_text,
            content=memory_records,
            content_rowid=rowid
        );",
    );
    match created {
        Ok(()) => {
            if !existed {
                // Index rows written while full-text search was unavailable
                if let Err(e) = conn.execute(
                    "INSERT INTO memory_records_fts (memory_records_fts) VALUES ('rebuild')",
                    [],
                ) {
                    tracing::warn!("[SqliteMemory] FTS rebuild failed: {}", e);
                }
            }
            FtsStatus {
                fts_available: true,
                fts_error: None,
            }
        }
        Err(e) => FtsStatus {
            fts_available: false,
            fts_error: Some(e.to_string()),
        },
    }
}

#[async_trait]
impl MemoryService for SqliteMemoryBackend {
    async fn store(&self, content: &str, metadata: MetadataInput) -> AppResult<String> {
        // Fail before normalizing when the backend is unusable
        self.database()?;
        let node = self.factory.build(content, metadata)?;
        self.store_nodes(std::slice::from_ref(&node))?;
        Ok(node.id)
    }

    async fn store_batch(&self, items: Vec<StoreItem>) -> AppResult<Vec<String>> {
        self.database()?;
        let nodes = self.factory.build_batch(items)?;
        if nodes.is_empty() {
            return Ok(Vec::new());
        }
        self.store_nodes(&nodes)?;
        Ok(nodes.into_iter().map(|n| n.id).collect())
    }

    async fn get(&self, id: &str) -> AppResult<Option<MemoryNode>> {
        self.get_record_by_id(id)
    }

    async fn retrieve(
        &self,
        query: &str,
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemorySearchResult>> {
        let limit = resolve_limit(limit, self.max_results);
        let conn = self.connection()?;
        let candidates = self.candidate_nodes(&conn, filters)?;
        let mut ranked = rank_candidates(candidates, query, filters, None, now_ms());
        ranked.truncate(limit);
        Ok(ranked)
    }

    async fn retrieve_scoped(
        &self,
        query: &str,
        scope: &Scope,
        options: &ScopedRetrieveOptions,
    ) -> AppResult<Vec<MemorySearchResult>> {
        let limit = resolve_limit(options.limit, self.max_results);
        let conn = self.connection()?;
        collect_scoped(query, scope, options, limit, now_ms(), |level, key| {
            nodes_at_level(&conn, level, key)
        })
    }

    async fn search_keywords(
        &self,
        keywords: &[String],
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemoryNode>> {
        let limit = resolve_limit(limit, self.max_results);
        let conn = self.connection()?;
        let mut matches: Vec<MemoryNode> = self
            .candidate_nodes(&conn, filters)?
            .into_iter()
            .filter(|node| can_read(&node.metadata, None))
            .filter(|node| filters.matches(&node.metadata))
            .filter(|node| matches_keywords(keywords, &node.content))
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn forget(&self, id: &str) -> AppResult<bool> {
        let mut conn = self.connection()?;
        Ok(self.remove_ids(&mut conn, &[id.to_string()])? > 0)
    }

    async fn forget_user(&self, user_id: &str) -> AppResult<usize> {
        let mut conn = self.connection()?;
        let ids = {
            let mut stmt = conn.prepare("SELECT id FROM memory_records WHERE user_id = ?1")?;
            let ids = stmt
                .query_map(params![user_id], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        self.remove_ids(&mut conn, &ids)
    }

    async fn delete_by_scope(&self, scope: &Scope, options: DeleteScopeOptions) -> AppResult<usize> {
        let Some(target) = scope.deepest_level() else {
            return Ok(0);
        };
        let Some(key) = scope.get(target) else {
            return Ok(0);
        };

        let mut conn = self.connection()?;
        let ids = {
            let mut stmt = conn.prepare(&format!(
                "SELECT id, scope_level, session_key, project, role, org
                 FROM memory_records WHERE {} = ?1",
                level_column(target)
            ))?;
            let rows = stmt
                .query_map(params![key], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row_scope(row, 2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter()
                .filter(|(_, level, node_scope)| {
                    let level = level.as_deref().and_then(|l| ScopeLevel::from_str(l).ok());
                    qualifies_for_delete(node_scope, level, scope, target, options.cascade)
                })
                .map(|(id, _, _)| id)
                .collect::<Vec<_>>()
        };

        let removed = self.remove_ids(&mut conn, &ids)?;
        tracing::debug!(
            "[SqliteMemory] delete_by_scope at {} (cascade={}) removed {}",
            target,
            options.cascade,
            removed
        );
        Ok(removed)
    }

    async fn compact(&self, user_id: Option<&str>) -> AppResult<usize> {
        let now = now_ms();
        let mut conn = self.connection()?;
        let entries = {
            let (sql, values) = match user_id {
                Some(user) => (
                    "SELECT id, fingerprint, updated_at, expires_at FROM memory_records WHERE user_id = ?1",
                    vec![Value::Text(user.to_string())],
                ),
                None => (
                    "SELECT id, fingerprint, updated_at, expires_at FROM memory_records",
                    Vec::new(),
                ),
            };
            let mut stmt = conn.prepare(sql)?;
            let entries = stmt
                .query_map(rusqlite::params_from_iter(values), |row| {
                    let expires_at: Option<i64> = row.get(3)?;
                    Ok(CompactionEntry {
                        id: row.get(0)?,
                        fingerprint: row.get(1)?,
                        updated_at: row.get(2)?,
                        expired: matches!(expires_at, Some(at) if at <= now),
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            entries
        };

        let victims = compaction_victims(&entries);
        let removed = self.remove_ids(&mut conn, &victims)?;
        tracing::info!(
            "[SqliteMemory] Compaction removed {} of {} records",
            removed,
            entries.len()
        );
        Ok(removed)
    }
}

impl std::fmt::Debug for SqliteMemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteMemoryBackend")
            .field("db_path", &self.db_path)
            .field("initialized", &self.is_initialized())
            .field("fts_available", &self.fts_available())
            .field("vector", &self.vector_index())
            .finish()
    }
}
