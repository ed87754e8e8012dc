//! Memory Service Interface
//!
//! The capability trait shared by the in-process and durable backends, its
//! request option types, and the write/read helpers both backends run so
//! that they agree on normalization, governance and ranking.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use agent_memory_core::{
    can_read, compare_ranked, normalize_metadata, scope_matches_at_level, score_by_text,
    GovernancePolicy, MemoryFilters, MemoryNode, MemorySearchResult, MetadataInput,
    NormalizeDefaults, Requester, Scope, ScopeLevel, NODE_SCHEMA_VERSION,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::models::settings::MemoryConfig;
use crate::utils::error::{AppError, AppResult};

/// Limit used when a read call does not pass one
pub const DEFAULT_RETRIEVE_LIMIT: usize = 20;

// ============================================================================
// Request types
// ============================================================================

/// One write in a `store_batch` call
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreItem {
    pub content: String,
    #[serde(default)]
    pub metadata: MetadataInput,
}

impl StoreItem {
    pub fn new(content: impl Into<String>, metadata: MetadataInput) -> Self {
        Self {
            content: content.into(),
            metadata,
        }
    }
}

/// Options for `retrieve_scoped`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScopedRetrieveOptions {
    pub limit: Option<usize>,
    #[serde(default)]
    pub filters: MemoryFilters,
    pub requester: Option<Requester>,
}

impl ScopedRetrieveOptions {
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_requester(mut self, requester: Requester) -> Self {
        self.requester = Some(requester);
        self
    }
}

/// Options for `delete_by_scope`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteScopeOptions {
    /// Also delete nodes scoped more specifically than the request
    pub cascade: bool,
}

impl Default for DeleteScopeOptions {
    fn default() -> Self {
        Self { cascade: true }
    }
}

// ============================================================================
// MemoryService trait
// ============================================================================

/// Store/retrieve/forget/compact over one backend.
///
/// Reads never return expired nodes. Writes are governance-checked before
/// anything is mutated.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Store one node and return its id. Fails with `GovernanceDenied`.
    async fn store(&self, content: &str, metadata: MetadataInput) -> AppResult<String>;

    /// Store several nodes; all-or-nothing.
    async fn store_batch(&self, items: Vec<StoreItem>) -> AppResult<Vec<String>>;

    /// Point lookup.
    async fn get(&self, id: &str) -> AppResult<Option<MemoryNode>>;

    /// Score every node against `query`, ignoring scope.
    ///
    /// Runs without a requester, so nodes carrying read allow-lists are not
    /// returned; use `retrieve_scoped` for those.
    async fn retrieve(
        &self,
        query: &str,
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemorySearchResult>>;

    /// Walk the scope hierarchy from the most specific requested level.
    async fn retrieve_scoped(
        &self,
        query: &str,
        scope: &Scope,
        options: &ScopedRetrieveOptions,
    ) -> AppResult<Vec<MemorySearchResult>>;

    /// Case-insensitive AND keyword match, newest first.
    async fn search_keywords(
        &self,
        keywords: &[String],
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemoryNode>>;

    async fn forget(&self, id: &str) -> AppResult<bool>;

    async fn forget_user(&self, user_id: &str) -> AppResult<usize>;

    async fn delete_by_scope(&self, scope: &Scope, options: DeleteScopeOptions) -> AppResult<usize>;

    /// Remove expired nodes and superseded duplicates; returns the count removed.
    async fn compact(&self, user_id: Option<&str>) -> AppResult<usize>;
}

// ============================================================================
// Embedding
// ============================================================================

/// Produces a node embedding from its content.
pub trait Embedder: Send + Sync {
    fn embed(&self, text: &str) -> AppResult<Vec<f32>>;
}

// ============================================================================
// Write path
// ============================================================================

/// Epoch-millisecond clock that never repeats or goes backwards.
#[derive(Debug, Default)]
pub struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> i64 {
        let wall = chrono::Utc::now().timestamp_millis();
        let mut prev = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(prev + 1);
            match self
                .last
                .compare_exchange_weak(prev, next, Ordering::SeqCst, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => prev = actual,
            }
        }
    }
}

/// Turns write requests into governance-approved, normalized nodes.
pub struct NodeFactory {
    policy: GovernancePolicy,
    defaults: NormalizeDefaults,
    dimensions: usize,
    embedder: Option<Arc<dyn Embedder>>,
    clock: MonotonicClock,
}

impl NodeFactory {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            policy: config.governance.clone(),
            defaults: config.normalize_defaults(),
            dimensions: config.embedding_dimensions,
            embedder: None,
            clock: MonotonicClock::new(),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Normalize, check governance, embed, assign an id.
    pub fn build(&self, content: &str, input: MetadataInput) -> AppResult<MemoryNode> {
        let now = self.clock.now();
        let metadata = normalize_metadata(input, now, &self.defaults);

        let decision = self.policy.decide(&metadata);
        if !decision.is_allowed() {
            tracing::debug!(
                "[MemoryStore] Write denied for agent={:?} source={} (rule {:?})",
                metadata.agent_id,
                metadata.source_id,
                decision.rule_index
            );
            return Err(AppError::governance_denied(format!(
                "write by agent {:?} from source '{}' rejected by policy",
                metadata.agent_id, metadata.source_id
            )));
        }

        let embedding = match self.embedder {
            Some(ref embedder) => {
                let vector = embedder.embed(content)?;
                if vector.len() != self.dimensions {
                    return Err(AppError::validation(format!(
                        "embedding has {} dimensions, expected {}",
                        vector.len(),
                        self.dimensions
                    )));
                }
                vector
            }
            None => Vec::new(),
        };

        Ok(MemoryNode {
            id: uuid::Uuid::new_v4().to_string(),
            content: content.to_string(),
            embedding,
            metadata,
            created_at: now,
            updated_at: now,
            version: NODE_SCHEMA_VERSION,
        })
    }

    /// Build every item first so a denial anywhere leaves storage untouched.
    pub fn build_batch(&self, items: Vec<StoreItem>) -> AppResult<Vec<MemoryNode>> {
        items
            .into_iter()
            .map(|item| self.build(&item.content, item.metadata))
            .collect()
    }
}

impl std::fmt::Debug for NodeFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeFactory")
            .field("policy", &self.policy)
            .field("dimensions", &self.dimensions)
            .field("has_embedder", &self.embedder.is_some())
            .finish()
    }
}

// ============================================================================
// Read path
// ============================================================================

/// Effective limit: caller value or the default, never above `max`.
pub fn resolve_limit(limit: Option<usize>, max: usize) -> usize {
    limit.unwrap_or(DEFAULT_RETRIEVE_LIMIT).min(max)
}

/// Filter and score candidates, returning them ranked.
pub fn rank_candidates<I>(
    candidates: I,
    query: &str,
    filters: &MemoryFilters,
    requester: Option<&Requester>,
    now: i64,
) -> Vec<MemorySearchResult>
where
    I: IntoIterator<Item = MemoryNode>,
{
    let mut ranked: Vec<MemorySearchResult> = candidates
        .into_iter()
        .filter(|node| !node.is_expired(now))
        .filter(|node| can_read(&node.metadata, requester))
        .filter(|node| filters.matches(&node.metadata))
        .filter_map(|node| {
            let score = score_by_text(query, &node.content);
            (score > 0).then_some(MemorySearchResult { node, score })
        })
        .collect();
    ranked.sort_by(compare_ranked);
    ranked
}

/// Scoped retrieval over a candidate source.
///
/// `candidates(level, key)` returns the nodes indexed under `key` at `level`.
/// Levels are visited most specific first; an earlier level's results always
/// precede a later level's regardless of score.
pub fn collect_scoped<F>(
    query: &str,
    scope: &Scope,
    options: &ScopedRetrieveOptions,
    limit: usize,
    now: i64,
    mut candidates: F,
) -> AppResult<Vec<MemorySearchResult>>
where
    F: FnMut(ScopeLevel, &str) -> AppResult<Vec<MemoryNode>>,
{
    let mut results = Vec::new();
    let mut seen = HashSet::new();

    for level in scope.populated_levels() {
        if results.len() >= limit {
            break;
        }
        let Some(key) = scope.get(level) else {
            continue;
        };
        let at_level = candidates(level, key)?
            .into_iter()
            .filter(|node| scope_matches_at_level(&node.metadata.scope, scope, level));
        let ranked = rank_candidates(
            at_level,
            query,
            &options.filters,
            options.requester.as_ref(),
            now,
        );
        for result in ranked {
            if results.len() >= limit {
                break;
            }
            if seen.insert(result.node.id.clone()) {
                results.push(result);
            }
        }
    }

    Ok(results)
}

/// Compaction input row: the narrow view of a node compaction needs.
#[derive(Debug, Clone)]
pub struct CompactionEntry {
    pub id: String,
    pub fingerprint: String,
    pub updated_at: i64,
    pub expired: bool,
}

/// Ids removed by compaction: every expired entry, plus every live entry that
/// is not the newest of its fingerprint group (ties keep the larger id).
pub fn compaction_victims(entries: &[CompactionEntry]) -> Vec<String> {
    let mut keepers: HashMap<&str, &CompactionEntry> = HashMap::new();
    for entry in entries.iter().filter(|e| !e.expired) {
        keepers
            .entry(entry.fingerprint.as_str())
            .and_modify(|keeper| {
                if (entry.updated_at, &entry.id) > (keeper.updated_at, &keeper.id) {
                    *keeper = entry;
                }
            })
            .or_insert(entry);
    }
    let kept: HashSet<&str> = keepers.values().map(|e| e.id.as_str()).collect();

    entries
        .iter()
        .filter(|e| e.expired || !kept.contains(e.id.as_str()))
        .map(|e| e.id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use agent_memory_core::{
        GovernanceRule, MemoryDomain, Retention, RuleAction, RuleMatch,
    };

    struct FixedEmbedder(usize);

    impl Embedder for FixedEmbedder {
        fn embed(&self, _text: &str) -> AppResult<Vec<f32>> {
            Ok(vec![0.5; self.0])
        }
    }

    fn factory() -> NodeFactory {
        NodeFactory::new(&MemoryConfig::default())
    }

    #[test]
    fn test_clock_is_strictly_increasing() {
        let clock = MonotonicClock::new();
        let mut prev = clock.now();
        for _ in 0..1000 {
            let next = clock.now();
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn test_build_normalizes_and_assigns_id() {
        let node = factory()
            .build(
                "hello",
                MetadataInput::new(MemoryDomain::UserPref)
                    .with_scope(Scope::session("s1").with_org("o1"))
                    .with_confidence(4.0),
            )
            .unwrap();
        assert!(!node.id.is_empty());
        assert_eq!(node.metadata.scope_level, Some(ScopeLevel::Session));
        assert_eq!(node.metadata.confidence_score, 1.0);
        assert_eq!(node.metadata.provenance.confidence, 1.0);
        assert_eq!(node.created_at, node.updated_at);
        assert!(node.embedding.is_empty());
        assert!(node.metadata.retention.expires_at.is_some());
    }

    #[test]
    fn test_build_denied_by_policy() {
        let config = MemoryConfig::default().with_governance(GovernancePolicy {
            default: RuleAction::Deny,
            rules: vec![GovernanceRule::allow(RuleMatch {
                agent_id: Some("a1".into()),
                ..Default::default()
            })],
        });
        let factory = NodeFactory::new(&config);
        assert!(factory
            .build("x", MetadataInput::default().with_agent("a1"))
            .is_ok());
        let err = factory
            .build("x", MetadataInput::default().with_agent("a2"))
            .unwrap_err();
        assert!(err.is_governance_denied());
    }

    #[test]
    fn test_build_batch_fails_as_a_whole() {
        let config = MemoryConfig::default().with_governance(GovernancePolicy {
            default: RuleAction::Allow,
            rules: vec![GovernanceRule::deny(RuleMatch {
                tag: Some("blocked".into()),
                ..Default::default()
            })],
        });
        let items = vec![
            StoreItem::new("ok", MetadataInput::default()),
            StoreItem::new("no", MetadataInput::default().with_tags(["blocked"])),
        ];
        assert!(NodeFactory::new(&config).build_batch(items).is_err());
    }

    #[test]
    fn test_embedder_dimension_checked() {
        let config = MemoryConfig {
            embedding_dimensions: 4,
            ..Default::default()
        };
        let ok = NodeFactory::new(&config).with_embedder(Arc::new(FixedEmbedder(4)));
        assert_eq!(ok.build("x", MetadataInput::default()).unwrap().embedding.len(), 4);

        let bad = NodeFactory::new(&config).with_embedder(Arc::new(FixedEmbedder(3)));
        let err = bad.build("x", MetadataInput::default()).unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[test]
    fn test_resolve_limit() {
        assert_eq!(resolve_limit(None, 500), DEFAULT_RETRIEVE_LIMIT);
        assert_eq!(resolve_limit(Some(10_000), 500), 500);
        assert_eq!(resolve_limit(Some(3), 500), 3);
    }

    #[test]
    fn test_rank_candidates_drops_expired_and_zero_scores() {
        let f = factory();
        let live = f.build("alpha beta", MetadataInput::default()).unwrap();
        let other = f.build("gamma", MetadataInput::default()).unwrap();
        let expired = f
            .build(
                "alpha",
                MetadataInput::default().with_retention(Retention::expires_at(1)),
            )
            .unwrap();
        let now = f.now();

        let ranked = rank_candidates(
            vec![live.clone(), other, expired],
            "alpha",
            &MemoryFilters::default(),
            None,
            now,
        );
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].node.id, live.id);
        assert_eq!(ranked[0].score, 2);
    }

    #[test]
    fn test_collect_scoped_prefers_specific_levels() {
        let f = factory();
        let session_node = f
            .build(
                "note",
                MetadataInput::default().with_scope(Scope::session("s1").with_org("o1")),
            )
            .unwrap();
        let org_node = f
            .build("note note", MetadataInput::default().with_scope(Scope::org("o1")))
            .unwrap();
        let now = f.now();
        let all = vec![session_node.clone(), org_node.clone()];

        let results = collect_scoped(
            "note",
            &Scope::session("s1").with_org("o1"),
            &ScopedRetrieveOptions::default(),
            10,
            now,
            |level, key| {
                Ok(all
                    .iter()
                    .filter(|n| n.metadata.scope.get(level) == Some(key))
                    .cloned()
                    .collect())
            },
        )
        .unwrap();
        let ids: Vec<&str> = results.iter().map(|r| r.node.id.as_str()).collect();
        assert_eq!(ids, vec![session_node.id.as_str(), org_node.id.as_str()]);
    }

    #[test]
    fn test_compaction_victims() {
        let entry = |id: &str, fp: &str, at: i64, expired: bool| CompactionEntry {
            id: id.into(),
            fingerprint: fp.into(),
            updated_at: at,
            expired,
        };
        let entries = vec![
            entry("a", "fp1", 1, false),
            entry("b", "fp1", 2, false),
            entry("c", "fp2", 1, false),
            entry("d", "fp2", 9, true),
        ];
        let mut victims = compaction_victims(&entries);
        victims.sort();
        assert_eq!(victims, vec!["a", "d"]);
    }
}
