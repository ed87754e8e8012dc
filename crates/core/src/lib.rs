//! Agent Memory Core
//!
//! Storage-free building blocks for the agent memory store: the metadata
//! model, governance rules, scope hierarchy, normalization and read-path
//! scoring. This crate has no dependency on any storage engine; backends in
//! the application crate share these functions so their results agree.
//!
//! ## Module Organization
//!
//! - `error` - Core error types (`CoreError`, `CoreResult`)
//! - `metadata` - `MemoryNode`, `Metadata`, `MetadataInput` and their parts
//! - `scope` - `Scope`, `ScopeLevel` and hierarchical match rules
//! - `normalize` - write-time metadata normalization
//! - `governance` - ordered allow/deny write policy
//! - `query` - text scoring, filters, read ACL, compaction fingerprint

pub mod error;
pub mod governance;
pub mod metadata;
pub mod normalize;
pub mod query;
pub mod scope;

// ── Error Types ────────────────────────────────────────────────────────
pub use error::{CoreError, CoreResult};

// ── Metadata Model ─────────────────────────────────────────────────────
pub use metadata::{
    AccessControl, MemoryDomain, MemoryNode, Metadata, MetadataInput, Provenance,
    ProvenanceInput, ReadAccess, Retention, NODE_SCHEMA_VERSION,
};

// ── Scope Hierarchy ────────────────────────────────────────────────────
pub use scope::{qualifies_for_delete, scope_matches_at_level, Scope, ScopeLevel};

// ── Normalization ──────────────────────────────────────────────────────
pub use normalize::{clamp_confidence, normalize_metadata, resolve_retention, NormalizeDefaults};

// ── Governance ─────────────────────────────────────────────────────────
pub use governance::{
    allows_write, GovernanceDecision, GovernancePolicy, GovernanceRule, RuleAction, RuleMatch,
};

// ── Read Path ──────────────────────────────────────────────────────────
pub use query::{
    can_read, compare_ranked, matches_keywords, score_by_text, Fingerprint, MemoryFilters,
    MemorySearchResult, Requester,
};
