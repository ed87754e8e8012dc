//! Optional vector search via the sqlite-vec `vec0` module.
//!
//! The module is statically linked through the `sqlite-vec` crate and
//! registered as an auto-extension, so every connection opened after
//! `register_bundled` can create `vec0` tables. An explicit extension path
//! loads a shared library instead. Loading is best-effort. The persisted
//! `vector_dims` marker is compared with the requested dimensionality; a
//! mismatch means the embedding model changed and the vector table is rebuilt
//! empty.

use std::path::Path;
use std::sync::Once;

use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};

use super::records::embedding_to_bytes;
use crate::storage::database::{read_meta, write_meta};
use crate::utils::error::{AppError, AppResult};

pub const VECTOR_DIMS_KEY: &str = "vector_dims";
pub const VECTOR_ENABLED_KEY: &str = "vector_enabled";

/// A loaded vector index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VectorIndex {
    pub dims: usize,
}

/// Outcome of `load_vector_extension`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VectorLoadResult {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl VectorLoadResult {
    pub(crate) fn failed(err: impl std::fmt::Display) -> Self {
        Self {
            ok: false,
            error: Some(err.to_string()),
        }
    }
}

/// A nearest-neighbour hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorMatch {
    pub record_id: String,
    pub distance: f64,
}

/// Register the bundled sqlite-vec entry point for connections opened after
/// this call. Runs once per process.
pub(crate) fn register_bundled() {
    static REGISTER: Once = Once::new();
    REGISTER.call_once(|| {
        // SAFETY: `sqlite3_vec_init` is the extension entry point statically
        // linked by the sqlite-vec crate; auto-extensions receive the standard
        // (db, err, api) arguments.
        let rc = unsafe {
            rusqlite::ffi::sqlite3_auto_extension(Some(std::mem::transmute::<*const (), _>(
                sqlite_vec::sqlite3_vec_init as *const (),
            )))
        };
        if rc != rusqlite::ffi::SQLITE_OK {
            tracing::warn!("[SqliteMemory] sqlite-vec registration failed (code {})", rc);
        }
    });
}

/// Load the extension (when a path is given) and confirm `vec0` is usable.
pub(crate) fn load_extension(conn: &Connection, path: Option<&Path>) -> AppResult<()> {
    if let Some(path) = path {
        // SAFETY: loading is enabled only for the duration of this call and the
        // path comes from the operator's configuration.
        let loaded = unsafe {
            conn.load_extension_enable()?;
            let result = conn.load_extension(path, None);
            conn.load_extension_disable()?;
            result
        };
        loaded.map_err(|e| {
            AppError::ExtensionUnavailable(format!(
                "failed to load {}: {}",
                path.display(),
                e
            ))
        })?;
    }

    conn.query_row("SELECT vec_version()", [], |row| row.get::<_, String>(0))
        .map(|version| tracing::info!("[SqliteMemory] sqlite-vec {} available", version))
        .map_err(|e| AppError::ExtensionUnavailable(format!("vec0 module not available: {}", e)))
}

/// Stored dimensionality marker, if valid
pub(crate) fn read_vector_dims(conn: &Connection) -> Option<usize> {
    read_meta(conn, VECTOR_DIMS_KEY)
        .ok()
        .flatten()
        .and_then(|raw| raw.parse::<usize>().ok())
        .filter(|dims| *dims > 0)
}

/// Create (or rebuild on dimension change) the vector table.
pub(crate) fn ensure_vec_table(conn: &Connection, dims: usize) -> AppResult<()> {
    if let Some(existing) = read_vector_dims(conn) {
        if existing != dims {
            tracing::warn!(
                "[SqliteMemory] Embedding dimensions changed ({} -> {}); resetting vector table",
                existing,
                dims
            );
            conn.execute_batch("DROP TABLE IF EXISTS memory_vec")?;
        }
    }

    conn.execute_batch(&format!(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memory_vec USING vec0(
            record_id TEXT PRIMARY KEY,
            embedding float[{}]
        )",
        dims
    ))
    .map_err(|e| AppError::ExtensionUnavailable(format!("vec0 table: {}", e)))?;

    write_meta(conn, VECTOR_ENABLED_KEY, "true")?;
    write_meta(conn, VECTOR_DIMS_KEY, &dims.to_string())?;
    Ok(())
}

/// Upsert as delete-then-insert; `vec0` has no in-place update.
pub(crate) fn upsert_embedding(conn: &Connection, record_id: &str, embedding: &[f32]) -> AppResult<()> {
    conn.execute("DELETE FROM memory_vec WHERE record_id = ?1", params![record_id])?;
    conn.execute(
        "INSERT INTO memory_vec (record_id, embedding) VALUES (?1, ?2)",
        params![record_id, embedding_to_bytes(embedding)],
    )?;
    Ok(())
}

pub(crate) fn nearest(conn: &Connection, embedding: &[f32], limit: usize) -> AppResult<Vec<VectorMatch>> {
    let mut stmt = conn.prepare(
        "SELECT record_id, distance FROM memory_vec
         WHERE embedding MATCH ?1
         ORDER BY distance ASC
         LIMIT ?2",
    )?;
    let matches = stmt
        .query_map(params![embedding_to_bytes(embedding), limit as i64], |row| {
            Ok(VectorMatch {
                record_id: row.get(0)?,
                distance: row.get(1)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(matches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::database::META_TABLE_SQL;

    fn conn() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute(META_TABLE_SQL, []).unwrap();
        conn
    }

    fn vec_conn(dims: usize) -> Connection {
        register_bundled();
        let conn = conn();
        load_extension(&conn, None).unwrap();
        ensure_vec_table(&conn, dims).unwrap();
        conn
    }

    fn vec_rows(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM memory_vec", [], |row| row.get(0))
            .unwrap()
    }

    #[test]
    fn test_bundled_module_is_available() {
        register_bundled();
        assert!(load_extension(&conn(), None).is_ok());
    }

    #[test]
    fn test_bad_path_is_reported() {
        let err = load_extension(&conn(), Some(Path::new("/nonexistent/vec0.so"))).unwrap_err();
        assert!(matches!(err, AppError::ExtensionUnavailable(_)));
    }

    #[test]
    fn test_dimension_change_resets_table() {
        let conn = vec_conn(3);
        upsert_embedding(&conn, "a", &[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(vec_rows(&conn), 1);

        ensure_vec_table(&conn, 3).unwrap();
        assert_eq!(vec_rows(&conn), 1);

        ensure_vec_table(&conn, 4).unwrap();
        assert_eq!(vec_rows(&conn), 0);
        assert_eq!(read_vector_dims(&conn), Some(4));
        upsert_embedding(&conn, "a", &[1.0, 0.0, 0.0, 0.0]).unwrap();
    }

    #[test]
    fn test_upsert_replaces_embedding() {
        let conn = vec_conn(2);
        upsert_embedding(&conn, "a", &[1.0, 0.0]).unwrap();
        upsert_embedding(&conn, "a", &[0.0, 1.0]).unwrap();
        assert_eq!(vec_rows(&conn), 1);

        let hits = nearest(&conn, &[0.0, 1.0], 5).unwrap();
        assert_eq!(hits[0].record_id, "a");
        assert!(hits[0].distance < 1e-6);
    }

    #[test]
    fn test_nearest_orders_by_distance() {
        let conn = vec_conn(2);
        upsert_embedding(&conn, "far", &[-1.0, 0.0]).unwrap();
        upsert_embedding(&conn, "near", &[1.0, 0.1]).unwrap();
        upsert_embedding(&conn, "mid", &[0.0, 1.0]).unwrap();

        let ids: Vec<String> = nearest(&conn, &[1.0, 0.0], 3)
            .unwrap()
            .into_iter()
            .map(|m| m.record_id)
            .collect();
        assert_eq!(ids, vec!["near", "mid", "far"]);
        assert_eq!(nearest(&conn, &[1.0, 0.0], 1).unwrap().len(), 1);
    }

    #[test]
    fn test_read_vector_dims_ignores_garbage() {
        let conn = conn();
        assert_eq!(read_vector_dims(&conn), None);
        write_meta(&conn, VECTOR_DIMS_KEY, "zero").unwrap();
        assert_eq!(read_vector_dims(&conn), None);
        write_meta(&conn, VECTOR_DIMS_KEY, "0").unwrap();
        assert_eq!(read_vector_dims(&conn), None);
        write_meta(&conn, VECTOR_DIMS_KEY, "384").unwrap();
        assert_eq!(read_vector_dims(&conn), Some(384));
    }
}
