//! Agent Memory - Rust Library
//!
//! Scoped, governed memory for AI agents. It includes:
//! - An in-process backend with a hierarchical scope index
//! - A durable SQLite backend with migrations, full-text and optional vector search
//! - Configuration storage and data models
//!
//! The storage-free pieces (metadata model, governance, scope rules, scoring)
//! live in the `agent-memory-core` crate and are re-exported here.

pub mod models;
pub mod services;
pub mod storage;
pub mod utils;

pub use agent_memory_core::{
    GovernancePolicy, GovernanceRule, MemoryDomain, MemoryFilters, MemoryNode,
    MemorySearchResult, Metadata, MetadataInput, Requester, Retention, RuleAction, RuleMatch,
    Scope, ScopeLevel,
};
pub use models::settings::{BackendKind, MemoryConfig, SettingsUpdate};
pub use services::memory::{
    create_memory_service, DeleteScopeOptions, InProcessMemoryStore, MemoryBackend,
    MemoryService, ScopedRetrieveOptions, SqliteMemoryBackend, StoreItem,
};
pub use storage::ConfigService;
pub use utils::error::{AppError, AppResult};
