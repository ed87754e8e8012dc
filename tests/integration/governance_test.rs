//! Governance Integration Tests

use agent_memory::{
    AppError, GovernancePolicy, GovernanceRule, MemoryConfig, MemoryFilters, MemoryService,
    MetadataInput, RuleAction, RuleMatch, StoreItem,
};

use crate::common::both_backends;

fn only_a1() -> GovernancePolicy {
    GovernancePolicy {
        default: RuleAction::Deny,
        rules: vec![GovernanceRule::allow(RuleMatch {
            agent_id: Some("a1".into()),
            ..Default::default()
        })],
    }
}

#[tokio::test]
async fn test_allow_listed_agent_only() {
    let config = MemoryConfig::default().with_governance(only_a1());
    let (backends, _dir) = both_backends(config).await;
    for backend in &backends {
        backend
            .store("allowed", MetadataInput::default().with_agent("a1"))
            .await
            .unwrap();

        let err = backend
            .store("denied", MetadataInput::default().with_agent("a2"))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::GovernanceDenied(_)));
    }
}

#[tokio::test]
async fn test_denied_batch_writes_nothing() {
    let config = MemoryConfig::default().with_governance(only_a1());
    let (backends, _dir) = both_backends(config).await;
    for backend in &backends {
        let err = backend
            .store_batch(vec![
                StoreItem::new("ok", MetadataInput::default().with_agent("a1")),
                StoreItem::new("rejected", MetadataInput::default().with_agent("a2")),
            ])
            .await
            .unwrap_err();
        assert!(err.is_governance_denied());
        assert!(backend
            .retrieve("", &MemoryFilters::default(), None)
            .await
            .unwrap()
            .is_empty());
    }
}

#[tokio::test]
async fn test_policy_from_json() {
    let policy: GovernancePolicy = serde_json::from_str(
        r#"{"default":"deny","rules":[{"action":"allow","match":{"agentId":"a1"}}]}"#,
    )
    .unwrap();
    assert_eq!(policy, only_a1());
}
