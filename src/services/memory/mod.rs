//! Agent Memory Store
//!
//! Scoped, governed memory for agents with two interchangeable backends
//! behind the `MemoryService` trait.
//!
//! ## Module Structure
//!
//! - `service` - `MemoryService` trait, request options, shared write/read helpers
//! - `index` - `ScopeIndex`, per-level id sets for the in-process backend
//! - `in_process` - `InProcessMemoryStore`
//! - `sqlite` - `SqliteMemoryBackend` (durable, FTS5 + optional vector search)
//! - `sanitize` - secret redaction for derived search text
//! - `factory` - config-driven backend selection

pub mod factory;
pub mod in_process;
pub mod index;
pub mod sanitize;
pub mod service;
pub mod sqlite;

pub use factory::{create_memory_service, MemoryBackend};
pub use in_process::InProcessMemoryStore;
pub use index::ScopeIndex;
pub use sanitize::{contains_secret, redact_secrets};
pub use service::{
    DeleteScopeOptions, Embedder, MemoryService, NodeFactory, ScopedRetrieveOptions, StoreItem,
    DEFAULT_RETRIEVE_LIMIT,
};
pub use sqlite::{
    FtsStatus, HealthCheck, HealthDetails, HealthStatus, MemoryStats, MemoryTransaction,
    RecordHit, RecordQueryFilters, SessionListItem, SessionSummary, SqliteMemoryBackend,
    ToolStats, TraceEvent, VectorLoadResult, VectorMatch,
};
