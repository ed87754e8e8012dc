//! Memory Service Integration Tests
//!
//! Every test runs the same assertions against the in-process and the
//! SQLite backend.

use agent_memory::{
    DeleteScopeOptions, MemoryConfig, MemoryDomain, MemoryFilters, MemoryService, MetadataInput,
    Retention, Scope, ScopeLevel, ScopedRetrieveOptions, StoreItem,
};

use crate::common::both_backends;

// ============================================================================
// Round trip & scoring
// ============================================================================

#[tokio::test]
async fn test_store_then_retrieve_round_trip() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        backend
            .store("the build uses cargo", MetadataInput::default())
            .await
            .unwrap();

        let results = backend
            .retrieve("", &MemoryFilters::default(), None)
            .await
            .unwrap();
        assert_eq!(results.len(), 1, "{:?}", backend.kind());
        assert_eq!(results[0].node.content, "the build uses cargo");
    }
}

#[tokio::test]
async fn test_scope_level_and_confidence_are_normalized() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        let id = backend
            .store(
                "normalized",
                MetadataInput::default()
                    .with_scope(Scope::org("o1").with_role("r1").with_project("p1"))
                    .with_confidence(3.5),
            )
            .await
            .unwrap();
        let node = backend.get(&id).await.unwrap().unwrap();
        assert_eq!(node.metadata.scope_level, Some(ScopeLevel::Project));
        assert_eq!(node.metadata.confidence_score, 1.0);
        assert_eq!(node.metadata.provenance.confidence, node.metadata.confidence_score);
    }
}

#[tokio::test]
async fn test_scoped_end_to_end_example() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        backend
            .store(
                "alpha beta",
                MetadataInput::new(MemoryDomain::SystemFact).with_scope(Scope::session("s1")),
            )
            .await
            .unwrap();

        let options = ScopedRetrieveOptions::default();
        let hits = backend
            .retrieve_scoped("alpha", &Scope::session("s1"), &options)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].score, 2);

        let misses = backend
            .retrieve_scoped("gamma", &Scope::session("s1"), &options)
            .await
            .unwrap();
        assert!(misses.is_empty());
    }
}

#[tokio::test]
async fn test_scope_containment() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        backend
            .store(
                "release checklist",
                MetadataInput::default().with_scope(Scope::session("s1").with_org("o1")),
            )
            .await
            .unwrap();

        let options = ScopedRetrieveOptions::default();
        let found = backend
            .retrieve_scoped("release", &Scope::session("s1"), &options)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);

        let other = backend
            .retrieve_scoped("release", &Scope::session("s2"), &options)
            .await
            .unwrap();
        assert!(other.is_empty());
    }
}

// ============================================================================
// Mutations
// ============================================================================

#[tokio::test]
async fn test_cascade_versus_exact_delete() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        let session_note =
            MetadataInput::default().with_scope(Scope::session("s1").with_project("p1"));
        let id = backend.store("session note", session_note).await.unwrap();

        let removed = backend
            .delete_by_scope(&Scope::project("p1"), DeleteScopeOptions { cascade: false })
            .await
            .unwrap();
        assert_eq!(removed, 0);
        assert!(backend.get(&id).await.unwrap().is_some());

        let removed = backend
            .delete_by_scope(&Scope::project("p1"), DeleteScopeOptions { cascade: true })
            .await
            .unwrap();
        assert_eq!(removed, 1);
        assert!(backend.get(&id).await.unwrap().is_none());
    }
}

#[tokio::test]
async fn test_compaction_keeps_newer_duplicate() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        let meta = MetadataInput::new(MemoryDomain::UserPref).with_user("u1");
        let older = backend.store("Prefers Tabs", meta.clone()).await.unwrap();
        let newer = backend.store("prefers tabs", meta).await.unwrap();

        assert_eq!(backend.compact(None).await.unwrap(), 1);
        assert!(backend.get(&older).await.unwrap().is_none());
        assert!(backend.get(&newer).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn test_expired_node_is_invisible_and_compacted() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        let id = backend
            .store(
                "expired alpha",
                MetadataInput::default()
                    .with_scope(Scope::session("s1"))
                    .with_retention(Retention::expires_at(1_000)),
            )
            .await
            .unwrap();

        assert!(backend.get(&id).await.unwrap().is_none());
        assert!(backend
            .retrieve("alpha", &MemoryFilters::default(), None)
            .await
            .unwrap()
            .is_empty());
        assert!(backend
            .retrieve_scoped("alpha", &Scope::session("s1"), &ScopedRetrieveOptions::default())
            .await
            .unwrap()
            .is_empty());
        assert!(backend
            .search_keywords(&["alpha".to_string()], &MemoryFilters::default(), None)
            .await
            .unwrap()
            .is_empty());

        assert_eq!(backend.compact(None).await.unwrap(), 1);
    }
}

#[tokio::test]
async fn test_store_batch_and_forget_user() {
    let (backends, _dir) = both_backends(MemoryConfig::default()).await;
    for backend in &backends {
        let ids = backend
            .store_batch(vec![
                StoreItem::new("one", MetadataInput::default().with_user("u1")),
                StoreItem::new("two", MetadataInput::default().with_user("u1")),
                StoreItem::new("three", MetadataInput::default().with_user("u2")),
            ])
            .await
            .unwrap();
        assert_eq!(ids.len(), 3);

        assert_eq!(backend.forget_user("u1").await.unwrap(), 2);
        assert!(backend.forget(&ids[2]).await.unwrap());
        assert!(!backend.forget(&ids[2]).await.unwrap());
        assert!(backend
            .retrieve("", &MemoryFilters::default(), None)
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_limits_are_clamped() {
    let config = MemoryConfig {
        max_results: 3,
        ..MemoryConfig::default()
    };
    let (backends, _dir) = both_backends(config).await;
    for backend in &backends {
        let items = (0..5)
            .map(|i| StoreItem::new(format!("note {}", i), MetadataInput::default()))
            .collect();
        backend.store_batch(items).await.unwrap();

        let results = backend
            .retrieve("note", &MemoryFilters::default(), Some(50))
            .await
            .unwrap();
        assert_eq!(results.len(), 3);
    }
}
