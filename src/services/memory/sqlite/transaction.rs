//! Explicit transactions over the durable backend's connection.

use agent_memory_core::MemoryNode;

use super::records::{insert_node, insert_trace, TraceEvent};
use crate::storage::database::{write_meta, DbConnection};
use crate::utils::error::{AppError, AppResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransactionState {
    Active,
    Committed,
    RolledBack,
}

/// An open `BEGIN ... COMMIT` block holding the backend's connection.
///
/// Once committed or rolled back every operation fails. Dropping an active
/// transaction rolls it back.
pub struct MemoryTransaction {
    conn: DbConnection,
    fts_available: bool,
    state: TransactionState,
}

impl MemoryTransaction {
    pub(crate) fn begin(conn: DbConnection, fts_available: bool) -> AppResult<Self> {
        conn.execute_batch("BEGIN")?;
        Ok(Self {
            conn,
            fts_available,
            state: TransactionState::Active,
        })
    }

    fn check_active(&self) -> AppResult<()> {
        if self.state != TransactionState::Active {
            return Err(AppError::transaction("Transaction is no longer active"));
        }
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.state == TransactionState::Active
    }

    pub fn insert_record(&mut self, node: &MemoryNode) -> AppResult<bool> {
        self.check_active()?;
        insert_node(&self.conn, node, self.fts_available)
    }

    pub fn insert_records_batch(&mut self, nodes: &[MemoryNode]) -> AppResult<usize> {
        self.check_active()?;
        let mut inserted = 0;
        for node in nodes {
            if insert_node(&self.conn, node, self.fts_available)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub fn insert_trace_event(&mut self, event: &TraceEvent) -> AppResult<bool> {
        self.check_active()?;
        insert_trace(&self.conn, event)
    }

    pub fn insert_trace_events_batch(&mut self, events: &[TraceEvent]) -> AppResult<usize> {
        self.check_active()?;
        let mut inserted = 0;
        for event in events {
            if insert_trace(&self.conn, event)? {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub fn set_meta(&mut self, key: &str, value: &str) -> AppResult<()> {
        self.check_active()?;
        write_meta(&self.conn, key, value)
    }

    pub fn commit(&mut self) -> AppResult<()> {
        self.check_active()?;
        self.conn
            .execute_batch("COMMIT")
            .map_err(|e| AppError::transaction(format!("Commit failed: {}", e)))?;
        self.state = TransactionState::Committed;
        Ok(())
    }

    /// Roll back. Repeated calls are no-ops; a committed transaction errors.
    pub fn rollback(&mut self) -> AppResult<()> {
        match self.state {
            TransactionState::Committed => Err(AppError::transaction(
                "Cannot rollback a committed transaction",
            )),
            TransactionState::RolledBack => Ok(()),
            TransactionState::Active => {
                if let Err(e) = self.conn.execute_batch("ROLLBACK") {
                    tracing::warn!("[SqliteMemory] Rollback failed: {}", e);
                }
                self.state = TransactionState::RolledBack;
                Ok(())
            }
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if self.state == TransactionState::Active {
            let _ = self.rollback();
        }
    }
}

impl std::fmt::Debug for MemoryTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryTransaction")
            .field("state", &self.state)
            .field("fts_available", &self.fts_available)
            .finish()
    }
}
