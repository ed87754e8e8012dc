//! In-Process Memory Store
//!
//! Arena of nodes plus the scope index, guarded by a single tokio `RwLock`.
//! Every mutation updates the node table and the index under one write
//! guard, so concurrent callers never observe one without the other.

use std::collections::HashMap;
use std::sync::Arc;

use agent_memory_core::{
    can_read, matches_keywords, qualifies_for_delete, Fingerprint, MemoryFilters, MemoryNode,
    MemorySearchResult, MetadataInput, Scope,
};
use async_trait::async_trait;
use tokio::sync::RwLock;

use super::index::ScopeIndex;
use super::service::{
    collect_scoped, compaction_victims, rank_candidates, resolve_limit, CompactionEntry,
    DeleteScopeOptions, Embedder, MemoryService, NodeFactory, ScopedRetrieveOptions, StoreItem,
};
use crate::models::settings::MemoryConfig;
use crate::utils::error::AppResult;

#[derive(Debug, Default)]
struct MemoryArena {
    nodes: HashMap<String, MemoryNode>,
    index: ScopeIndex,
}

impl MemoryArena {
    fn insert(&mut self, node: MemoryNode) {
        if let Some(previous) = self.nodes.get(&node.id) {
            let scope = previous.metadata.scope.clone();
            self.index.remove(&node.id, &scope);
        }
        self.index.insert(&node.id, &node.metadata.scope);
        self.nodes.insert(node.id.clone(), node);
    }

    fn remove(&mut self, id: &str) -> Option<MemoryNode> {
        let node = self.nodes.remove(id)?;
        self.index.remove(id, &node.metadata.scope);
        Some(node)
    }

    fn remove_all(&mut self, ids: &[String]) -> usize {
        ids.iter().filter(|id| self.remove(id).is_some()).count()
    }
}

/// Single-process `MemoryService` backend.
pub struct InProcessMemoryStore {
    factory: NodeFactory,
    max_results: usize,
    arena: RwLock<MemoryArena>,
}

impl InProcessMemoryStore {
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            factory: NodeFactory::new(config),
            max_results: config.max_results,
            arena: RwLock::new(MemoryArena::default()),
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn Embedder>) -> Self {
        self.factory = self.factory.with_embedder(embedder);
        self
    }

    /// Number of stored nodes, expired ones included.
    pub async fn len(&self) -> usize {
        self.arena.read().await.nodes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

#[async_trait]
impl MemoryService for InProcessMemoryStore {
    async fn store(&self, content: &str, metadata: MetadataInput) -> AppResult<String> {
        let node = self.factory.build(content, metadata)?;
        let id = node.id.clone();
        self.arena.write().await.insert(node);
        Ok(id)
    }

    async fn store_batch(&self, items: Vec<StoreItem>) -> AppResult<Vec<String>> {
        let nodes = self.factory.build_batch(items)?;
        let ids = nodes.iter().map(|n| n.id.clone()).collect();
        let mut arena = self.arena.write().await;
        for node in nodes {
            arena.insert(node);
        }
        Ok(ids)
    }

    async fn get(&self, id: &str) -> AppResult<Option<MemoryNode>> {
        let now = Self::now();
        let arena = self.arena.read().await;
        Ok(arena
            .nodes
            .get(id)
            .filter(|node| !node.is_expired(now))
            .cloned())
    }

    async fn retrieve(
        &self,
        query: &str,
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemorySearchResult>> {
        let limit = resolve_limit(limit, self.max_results);
        let arena = self.arena.read().await;
        let mut ranked = rank_candidates(
            arena.nodes.values().cloned(),
            query,
            filters,
            None,
            Self::now(),
        );
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
        let arena = self.arena.read().await;
        collect_scoped(query, scope, options, limit, Self::now(), |level, key| {
            Ok(arena
                .index
                .ids(level, key)
                .iter()
                .filter_map(|id| arena.nodes.get(id).cloned())
                .collect())
        })
    }

    async fn search_keywords(
        &self,
        keywords: &[String],
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemoryNode>> {
        let limit = resolve_limit(limit, self.max_results);
        let now = Self::now();
        let arena = self.arena.read().await;
        let mut matches: Vec<MemoryNode> = arena
            .nodes
            .values()
            .filter(|node| !node.is_expired(now))
            .filter(|node| can_read(&node.metadata, None))
            .filter(|node| filters.matches(&node.metadata))
            .filter(|node| matches_keywords(keywords, &node.content))
            .cloned()
            .collect();
        matches.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matches.truncate(limit);
        Ok(matches)
    }

    async fn forget(&self, id: &str) -> AppResult<bool> {
        Ok(self.arena.write().await.remove(id).is_some())
    }

    async fn forget_user(&self, user_id: &str) -> AppResult<usize> {
        let mut arena = self.arena.write().await;
        let ids: Vec<String> = arena
            .nodes
            .values()
            .filter(|node| node.metadata.user_id.as_deref() == Some(user_id))
            .map(|node| node.id.clone())
            .collect();
        Ok(arena.remove_all(&ids))
    }

    async fn delete_by_scope(&self, scope: &Scope, options: DeleteScopeOptions) -> AppResult<usize> {
        let Some(target) = scope.deepest_level() else {
            return Ok(0);
        };
        let Some(key) = scope.get(target) else {
            return Ok(0);
        };

        let mut arena = self.arena.write().await;
        let ids: Vec<String> = arena
            .index
            .ids(target, key)
            .into_iter()
            .filter(|id| {
                arena.nodes.get(id).is_some_and(|node| {
                    qualifies_for_delete(
                        &node.metadata.scope,
                        node.metadata.scope_level,
                        scope,
                        target,
                        options.cascade,
                    )
                })
            })
            .collect();
        let removed = arena.remove_all(&ids);
        tracing::debug!(
            "[MemoryStore] delete_by_scope at {} (cascade={}) removed {}",
            target,
            options.cascade,
            removed
        );
        Ok(removed)
    }

    async fn compact(&self, user_id: Option<&str>) -> AppResult<usize> {
        let now = Self::now();
        let mut arena = self.arena.write().await;
        let entries: Vec<CompactionEntry> = arena
            .nodes
            .values()
            .filter(|node| user_id.map_or(true, |u| node.metadata.user_id.as_deref() == Some(u)))
            .map(|node| CompactionEntry {
                id: node.id.clone(),
                fingerprint: Fingerprint::of(node).canonical(),
                updated_at: node.updated_at,
                expired: node.is_expired(now),
            })
            .collect();

        let victims = compaction_victims(&entries);
        let removed = arena.remove_all(&victims);
        tracing::info!(
            "[MemoryStore] Compaction removed {} of {} nodes",
            removed,
            entries.len()
        );
        Ok(removed)
    }
}

impl std::fmt::Debug for InProcessMemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InProcessMemoryStore")
            .field("factory", &self.factory)
            .field("max_results", &self.max_results)
            .finish()
    }
}
