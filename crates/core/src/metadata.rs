//! Memory Metadata Model
//!
//! Value types for a stored memory node and its governance, scope, retention
//! and provenance metadata. `MetadataInput` is the caller-facing shape with
//! every field optional; `Metadata` is the normalized form that is persisted
//! (see `normalize`).

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};
use crate::normalize::clamp_confidence;
use crate::scope::{Scope, ScopeLevel};

/// Current metadata shape revision. Nodes decoded with an older version are
/// upgraded by [`MemoryNode::from_json`].
pub const NODE_SCHEMA_VERSION: u32 = 2;

// ============================================================================
// Enums
// ============================================================================

/// Purpose of a memory record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryDomain {
    UserPref,
    SystemFact,
    SessionSummary,
    AgentEval,
    CodeContext,
}

impl MemoryDomain {
    /// Convert to database string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryDomain::UserPref => "user_pref",
            MemoryDomain::SystemFact => "system_fact",
            MemoryDomain::SessionSummary => "session_summary",
            MemoryDomain::AgentEval => "agent_eval",
            MemoryDomain::CodeContext => "code_context",
        }
    }

    /// Parse from database string representation
    pub fn from_str(s: &str) -> CoreResult<Self> {
        match s {
            "user_pref" => Ok(MemoryDomain::UserPref),
            "system_fact" => Ok(MemoryDomain::SystemFact),
            "session_summary" => Ok(MemoryDomain::SessionSummary),
            "agent_eval" => Ok(MemoryDomain::AgentEval),
            "code_context" => Ok(MemoryDomain::CodeContext),
            _ => Err(CoreError::validation(format!("Invalid memory domain: {}", s))),
        }
    }
}

impl Default for MemoryDomain {
    fn default() -> Self {
        MemoryDomain::SystemFact
    }
}

impl std::fmt::Display for MemoryDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Metadata parts
// ============================================================================

/// Read allow-lists. A node without one is readable by anyone in scope.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadAccess {
    #[serde(default)]
    pub agent_ids: Vec<String>,
    #[serde(default)]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessControl {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<ReadAccess>,
}

/// Expiry settings. `ttl_sec = Some(0)` without `expires_at` means "never expires".
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Retention {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ttl_sec: Option<u64>,
    /// Epoch milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
}

impl Retention {
    pub fn ttl(ttl_sec: u64) -> Self {
        Self {
            ttl_sec: Some(ttl_sec),
            expires_at: None,
        }
    }

    pub fn expires_at(expires_at: i64) -> Self {
        Self {
            ttl_sec: None,
            expires_at: Some(expires_at),
        }
    }

    pub fn is_expired(&self, now: i64) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }
}

/// How a node was produced. Fixed at creation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    #[serde(default)]
    pub source: String,
    /// Epoch milliseconds
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub confidence: f64,
}

/// Caller-supplied provenance; missing fields are filled during normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProvenanceInput {
    pub source: Option<String>,
    pub timestamp: Option<i64>,
    pub confidence: Option<f64>,
}

// ============================================================================
// Metadata
// ============================================================================

/// Normalized metadata owned by a single node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    pub domain: MemoryDomain,
    pub source_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: BTreeSet<String>,
    #[serde(default)]
    pub scope: Scope,
    /// Deepest populated field of `scope`; `None` for unscoped nodes
    #[serde(default)]
    pub scope_level: Option<ScopeLevel>,
    #[serde(default)]
    pub access: AccessControl,
    #[serde(default)]
    pub retention: Retention,
    #[serde(default)]
    pub confidence_score: f64,
    #[serde(default)]
    pub provenance: Provenance,
}

/// Write request metadata. Everything is optional.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MetadataInput {
    pub domain: Option<MemoryDomain>,
    pub source_id: Option<String>,
    pub agent_id: Option<String>,
    pub user_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub scope: Scope,
    pub scope_level: Option<ScopeLevel>,
    #[serde(default)]
    pub access: AccessControl,
    pub retention: Option<Retention>,
    pub confidence_score: Option<f64>,
    pub provenance: Option<ProvenanceInput>,
}

impl MetadataInput {
    pub fn new(domain: MemoryDomain) -> Self {
        Self {
            domain: Some(domain),
            ..Default::default()
        }
    }

    pub fn with_agent(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    pub fn with_source(mut self, source_id: impl Into<String>) -> Self {
        self.source_id = Some(source_id.into());
        self
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence_score = Some(confidence);
        self
    }

    pub fn with_readers(mut self, agent_ids: Vec<String>, user_ids: Vec<String>) -> Self {
        self.access.read = Some(ReadAccess {
            agent_ids,
            user_ids,
        });
        self
    }
}

// ============================================================================
// MemoryNode
// ============================================================================

fn legacy_version() -> u32 {
    1
}

/// The unit of storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryNode {
    pub id: String,
    pub content: String,
    /// Empty when no embedder is configured
    #[serde(default)]
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    /// Epoch milliseconds
    pub created_at: i64,
    /// Epoch milliseconds
    pub updated_at: i64,
    #[serde(default = "legacy_version")]
    pub version: u32,
}

impl MemoryNode {
    pub fn is_expired(&self, now: i64) -> bool {
        self.metadata.retention.is_expired(now)
    }

    /// Decode a stored node, upgrading older metadata shapes.
    pub fn from_json(raw: &str) -> CoreResult<Self> {
        let mut node: MemoryNode = serde_json::from_str(raw)?;
        node.upgrade();
        Ok(node)
    }

    /// Bring an older node encoding up to `NODE_SCHEMA_VERSION`.
    ///
    /// Version 1 nodes had no derived `scopeLevel` and no provenance block.
    pub fn upgrade(&mut self) {
        if self.version >= NODE_SCHEMA_VERSION {
            return;
        }
        let meta = &mut self.metadata;
        meta.scope = meta.scope.normalized();
        meta.scope_level = meta.scope.deepest_level();
        meta.confidence_score = clamp_confidence(meta.confidence_score);
        if meta.provenance.source.is_empty() {
            meta.provenance.source = meta.source_id.clone();
        }
        if meta.provenance.timestamp == 0 {
            meta.provenance.timestamp = self.created_at;
        }
        meta.provenance.confidence = meta.confidence_score;
        self.version = NODE_SCHEMA_VERSION;
    }
}
