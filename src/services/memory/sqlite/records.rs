//! Record Rows
//!
//! Row codec and query helpers for `memory_records` / `memory_trace`. Every
//! function takes a borrowed connection so the same code runs on a pooled
//! connection or inside a `MemoryTransaction`.

use agent_memory_core::{Fingerprint, MemoryDomain, MemoryNode, Scope, ScopeLevel};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::services::memory::sanitize::search_text;
use crate::utils::error::AppResult;

pub const FTS_TABLE: &str = "memory_records_fts";

/// Rows whose retention has not run out at `?N`
pub(crate) fn live_clause(param_index: usize) -> String {
    format!("(r.expires_at IS NULL OR r.expires_at > ?{})", param_index)
}

// ============================================================================
// Types
// ============================================================================

/// Column filters for record queries
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecordQueryFilters {
    pub session_key: Option<String>,
    pub source_id: Option<String>,
    pub domain: Option<MemoryDomain>,
    pub tag: Option<String>,
    pub min_confidence: Option<f64>,
    /// Inclusive lower bound on `created_at` (epoch ms)
    pub from: Option<i64>,
    /// Inclusive upper bound on `created_at` (epoch ms)
    pub to: Option<i64>,
    pub limit: Option<usize>,
}

/// A search hit; `rank` is the bm25 score when full-text search answered
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordHit {
    pub node: MemoryNode,
    pub rank: Option<f64>,
}

/// An append-only trace event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub id: String,
    /// Epoch milliseconds
    pub ts: i64,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_key: Option<String>,
    #[serde(default)]
    pub data: serde_json::Value,
}

impl TraceEvent {
    pub fn new(kind: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            ts: chrono::Utc::now().timestamp_millis(),
            kind: kind.into(),
            session_key: None,
            data,
        }
    }

    pub fn with_session(mut self, session_key: impl Into<String>) -> Self {
        self.session_key = Some(session_key.into());
        self
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// SHA-256 hex of the compaction fingerprint
pub fn fingerprint_hash(node: &MemoryNode) -> String {
    let mut hasher = Sha256::new();
    hasher.update(Fingerprint::of(node).canonical().as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}

/// Serialize an f32 embedding to a little-endian BLOB
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize a little-endian BLOB back to an f32 embedding
pub fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

pub(crate) fn level_column(level: ScopeLevel) -> &'static str {
    match level {
        ScopeLevel::Session => "session_key",
        ScopeLevel::Project => "project",
        ScopeLevel::Role => "role",
        ScopeLevel::Org => "org",
    }
}

/// Decode `data_json` (+ embedding blob). Malformed rows are skipped.
fn decode_node(id: &str, data_json: &str, embedding: Option<Vec<u8>>) -> Option<MemoryNode> {
    match MemoryNode::from_json(data_json) {
        Ok(mut node) => {
            if let Some(bytes) = embedding {
                node.embedding = bytes_to_embedding(&bytes);
            }
            Some(node)
        }
        Err(e) => {
            tracing::warn!("[SqliteMemory] Skipping unreadable record {}: {}", id, e);
            None
        }
    }
}

// ============================================================================
// Writes
// ============================================================================

/// `INSERT OR IGNORE` a node; returns whether a row was added.
///
/// A new row is also indexed into the full-text table when `fts` is set.
/// Full-text failures are logged and do not fail the write.
pub(crate) fn insert_node(conn: &Connection, node: &MemoryNode, fts: bool) -> AppResult<bool> {
    let meta = &node.metadata;
    let mut stored = node.clone();
    stored.embedding.clear();
    let data_json = serde_json::to_string(&stored)?;
    let data_text = search_text(node);
    let tags: Vec<&String> = meta.tags.iter().collect();
    let tags_json = serde_json::to_string(&tags)?;
    let embedding = (!node.embedding.is_empty()).then(|| embedding_to_bytes(&node.embedding));

    let changed = conn.execute(
        "INSERT OR IGNORE INTO memory_records (
            id, created_at, updated_at, domain, source_id, agent_id, user_id,
            session_key, project, role, org, scope_level, tags_json, confidence,
            expires_at, fingerprint, data_json, data_text, embedding, node_version
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20)",
        params![
            node.id,
            node.created_at,
            node.updated_at,
            meta.domain.as_str(),
            meta.source_id,
            meta.agent_id,
            meta.user_id,
            meta.scope.get(ScopeLevel::Session),
            meta.scope.get(ScopeLevel::Project),
            meta.scope.get(ScopeLevel::Role),
            meta.scope.get(ScopeLevel::Org),
            meta.scope_level.map(|l| l.as_str()),
            tags_json,
            meta.confidence_score,
            meta.retention.expires_at,
            fingerprint_hash(node),
            data_json,
            data_text,
            embedding,
            node.version,
        ],
    )?;

    let inserted = changed > 0;
    if inserted && fts {
        let result = conn.execute(
            "INSERT INTO memory_records_fts (rowid, source_id, domain, data_text)
             SELECT rowid, source_id, domain, data_text FROM memory_records WHERE id = ?1",
            params![node.id],
        );
        if let Err(e) = result {
            tracing::debug!("[SqliteMemory] FTS index insert failed for {}: {}", node.id, e);
        }
    }
    Ok(inserted)
}

/// Delete records by id, keeping the full-text and vector tables in step.
pub(crate) fn delete_nodes(
    conn: &Connection,
    ids: &[String],
    fts: bool,
    vector: bool,
) -> AppResult<usize> {
    let mut removed = 0;
    for id in ids {
        if fts {
            let result = conn.execute(
                "INSERT INTO memory_records_fts (memory_records_fts, rowid, source_id, domain, data_text)
                 SELECT 'delete', rowid, source_id, domain, data_text FROM memory_records WHERE id = ?1",
                params![id],
            );
            if let Err(e) = result {
                tracing::debug!("[SqliteMemory] FTS delete failed for {}: {}", id, e);
            }
        }
        if vector {
            if let Err(e) = conn.execute("DELETE FROM memory_vec WHERE record_id = ?1", params![id]) {
                tracing::debug!("[SqliteMemory] Vector delete failed for {}: {}", id, e);
            }
        }
        removed += conn.execute("DELETE FROM memory_records WHERE id = ?1", params![id])?;
    }
    Ok(removed)
}

/// `INSERT OR IGNORE` a trace event; returns whether a row was added.
pub(crate) fn insert_trace(conn: &Connection, event: &TraceEvent) -> AppResult<bool> {
    let data_json = serde_json::to_string(event)?;
    let changed = conn.execute(
        "INSERT OR IGNORE INTO memory_trace (id, ts, kind, session_key, data_json)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![event.id, event.ts, event.kind, event.session_key, data_json],
    )?;
    Ok(changed > 0)
}

// ============================================================================
// Reads
// ============================================================================

/// WHERE fragments for `filters`, parameters numbered from `first_param`
pub(crate) fn apply_filters(
    filters: &RecordQueryFilters,
    first_param: usize,
) -> (Vec<String>, Vec<Value>) {
    let mut conditions = Vec::new();
    let mut values: Vec<Value> = Vec::new();
    let mut push = |sql: &str, value: Value, conditions: &mut Vec<String>| {
        values.push(value);
        conditions.push(format!("{} ?{}", sql, first_param + values.len() - 1));
    };

    if let Some(ref session_key) = filters.session_key {
        push("r.session_key =", Value::Text(session_key.clone()), &mut conditions);
    }
    if let Some(ref source_id) = filters.source_id {
        push("r.source_id =", Value::Text(source_id.clone()), &mut conditions);
    }
    if let Some(domain) = filters.domain {
        push("r.domain =", Value::Text(domain.as_str().to_string()), &mut conditions);
    }
    if let Some(min) = filters.min_confidence {
        push("r.confidence >=", Value::Real(min), &mut conditions);
    }
    if let Some(from) = filters.from {
        push("r.created_at >=", Value::Integer(from), &mut conditions);
    }
    if let Some(to) = filters.to {
        push("r.created_at <=", Value::Integer(to), &mut conditions);
    }
    if let Some(ref tag) = filters.tag {
        // Match the tag as a complete JSON string inside the array
        let encoded = serde_json::Value::from(tag.as_str()).to_string();
        let pattern = format!("%{}%", escape_like(&encoded));
        push("r.tags_json LIKE", Value::Text(pattern), &mut conditions);
        if let Some(last) = conditions.last_mut() {
            last.push_str(LIKE_ESCAPE);
        }
    }
    (conditions, values)
}

/// Run `SELECT r.id, r.data_json, r.embedding FROM memory_records r <tail>`.
pub(crate) fn select_nodes(
    conn: &Connection,
    tail: &str,
    values: Vec<Value>,
) -> AppResult<Vec<MemoryNode>> {
    let sql = format!(
        "SELECT r.id, r.data_json, r.embedding FROM memory_records r {}",
        tail
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, json, embedding)| decode_node(&id, &json, embedding))
        .collect())
}

/// Live nodes matching `filters`, newest first.
pub(crate) fn query_filtered(
    conn: &Connection,
    filters: &RecordQueryFilters,
    now: i64,
    limit: usize,
) -> AppResult<Vec<MemoryNode>> {
    let (mut conditions, mut values) = apply_filters(filters, 2);
    conditions.insert(0, live_clause(1));
    values.insert(0, Value::Integer(now));
    let tail = format!(
        "WHERE {} ORDER BY r.created_at DESC LIMIT {}",
        conditions.join(" AND "),
        limit
    );
    select_nodes(conn, &tail, values)
}

pub(crate) fn get_node(conn: &Connection, id: &str, now: i64) -> AppResult<Option<MemoryNode>> {
    let tail = format!("WHERE r.id = ?1 AND {}", live_clause(2));
    Ok(select_nodes(
        conn,
        &tail,
        vec![Value::Text(id.to_string()), Value::Integer(now)],
    )?
    .into_iter()
    .next())
}

/// Every node with `column = key` at a scope level, expired ones included.
pub(crate) fn nodes_at_level(
    conn: &Connection,
    level: ScopeLevel,
    key: &str,
) -> AppResult<Vec<MemoryNode>> {
    let tail = format!("WHERE r.{} = ?1", level_column(level));
    select_nodes(conn, &tail, vec![Value::Text(key.to_string())])
}

/// Full-text search, quoted so query syntax characters are literal.
pub(crate) fn search_fts(
    conn: &Connection,
    query: &str,
    filters: &RecordQueryFilters,
    now: i64,
    limit: usize,
) -> AppResult<Vec<RecordHit>> {
    let fts_query = format!("\"{}\"", query.replace('"', "\"\""));
    let (mut conditions, mut values) = apply_filters(filters, 3);
    conditions.insert(0, live_clause(2));
    conditions.insert(0, "memory_records_fts MATCH ?1".to_string());
    values.insert(0, Value::Integer(now));
    values.insert(0, Value::Text(fts_query));

    let sql = format!(
        "SELECT r.id, r.data_json, r.embedding, bm25(memory_records_fts) AS rank
         FROM memory_records_fts
         JOIN memory_records r ON memory_records_fts.rowid = r.rowid
         WHERE {}
         ORDER BY rank ASC
         LIMIT {}",
        conditions.join(" AND "),
        limit
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<Vec<u8>>>(2)?,
                row.get::<_, f64>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .into_iter()
        .filter_map(|(id, json, embedding, rank)| {
            decode_node(&id, &json, embedding).map(|node| RecordHit {
                node,
                rank: Some(rank),
            })
        })
        .collect())
}

const LIKE_ESCAPE: &str = " ESCAPE '\\'";

/// Make `%`, `_` and `\` match literally in a `LIKE ... ESCAPE '\'` pattern.
pub(crate) fn escape_like(raw: &str) -> String {
    let mut escaped = String::with_capacity(raw.len());
    for c in raw.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// `LIKE` scan over the derived search text, newest first.
pub(crate) fn search_like(
    conn: &Connection,
    query: &str,
    filters: &RecordQueryFilters,
    now: i64,
    limit: usize,
) -> AppResult<Vec<RecordHit>> {
    let (mut conditions, mut values) = apply_filters(filters, 3);
    conditions.insert(0, live_clause(2));
    conditions.insert(0, format!("r.data_text LIKE ?1{}", LIKE_ESCAPE));
    values.insert(0, Value::Integer(now));
    values.insert(0, Value::Text(format!("%{}%", escape_like(query))));
    let tail = format!(
        "WHERE {} ORDER BY r.created_at DESC LIMIT {}",
        conditions.join(" AND "),
        limit
    );
    Ok(select_nodes(conn, &tail, values)?
        .into_iter()
        .map(|node| RecordHit { node, rank: None })
        .collect())
}

pub(crate) fn table_exists(conn: &Connection, name: &str) -> bool {
    conn.query_row(
        "SELECT name FROM sqlite_master WHERE name = ?1 AND type IN ('table', 'view')",
        params![name],
        |_| Ok(()),
    )
    .optional()
    .map(|found| found.is_some())
    .unwrap_or(false)
}

pub(crate) fn query_traces(
    conn: &Connection,
    from: i64,
    to: i64,
    kind: Option<&str>,
    limit: usize,
) -> AppResult<Vec<TraceEvent>> {
    let mut sql = String::from("SELECT data_json FROM memory_trace WHERE ts >= ?1 AND ts <= ?2");
    let mut values = vec![Value::Integer(from), Value::Integer(to)];
    if let Some(kind) = kind.map(str::trim).filter(|k| !k.is_empty()) {
        sql.push_str(" AND kind = ?3");
        values.push(Value::Text(kind.to_string()));
    }
    sql.push_str(&format!(" ORDER BY ts DESC LIMIT {}", limit));

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params_from_iter(values), |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows
        .iter()
        .filter_map(|raw| match serde_json::from_str::<TraceEvent>(raw) {
            Ok(event) => Some(event),
            Err(e) => {
                tracing::warn!("[SqliteMemory] Skipping unreadable trace event: {}", e);
                None
            }
        })
        .collect())
}

/// Scope of a stored row, read from its flattened columns
pub(crate) fn row_scope(row: &rusqlite::Row, first: usize) -> rusqlite::Result<Scope> {
    Ok(Scope {
        session: row.get(first)?,
        project: row.get(first + 1)?,
        role: row.get(first + 2)?,
        org: row.get(first + 3)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_embedding_bytes_roundtrip() {
        let embedding = vec![0.25_f32, -1.5, 3.0];
        let bytes = embedding_to_bytes(&embedding);
        assert_eq!(bytes.len(), 12);
        assert_eq!(bytes_to_embedding(&bytes), embedding);
    }

    #[test]
    fn test_apply_filters_numbers_params() {
        let filters = RecordQueryFilters {
            session_key: Some("s1".into()),
            tag: Some("a\"b".into()),
            ..Default::default()
        };
        let (conditions, values) = apply_filters(&filters, 3);
        assert_eq!(
            conditions,
            vec!["r.session_key = ?3", "r.tags_json LIKE ?4 ESCAPE '\\'"]
        );
        assert_eq!(values[1], Value::Text("%\"a\\\\\"b\"%".into()));
    }

    #[test]
    fn test_escape_like() {
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("50%_off"), "50\\%\\_off");
        assert_eq!(escape_like("C:\\tmp"), "C:\\\\tmp");
    }

    #[test]
    fn test_fingerprint_hash_is_hex_sha256() {
        let node: MemoryNode = serde_json::from_value(serde_json::json!({
            "id": "n1",
            "content": "Hello",
            "metadata": {"domain": "system_fact", "sourceId": "s"},
            "createdAt": 1,
            "updatedAt": 1,
            "version": 2
        }))
        .unwrap();
        let mut other = node.clone();
        other.id = "n2".into();
        other.content = "hello".into();

        let hash = fingerprint_hash(&node);
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(hash, fingerprint_hash(&other));
    }
}
