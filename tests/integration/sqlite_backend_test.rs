//! SQLite Backend Integration Tests
//!
//! Persistence across reopen, idempotent inserts, traces and introspection.

use agent_memory::services::memory::{HealthStatus, RecordQueryFilters, TraceEvent};
use agent_memory::{MemoryConfig, MemoryService, MetadataInput, Scope, SqliteMemoryBackend};
use tempfile::tempdir;

fn open(config: &MemoryConfig) -> SqliteMemoryBackend {
    let backend = SqliteMemoryBackend::new(config).unwrap();
    backend.init().unwrap();
    backend
}

#[tokio::test]
async fn test_duplicate_insert_leaves_one_row() {
    let dir = tempdir().unwrap();
    let backend = open(&MemoryConfig::sqlite(dir.path().join("m.db")));

    let id = backend.store("only once", MetadataInput::default()).await.unwrap();
    let node = backend.get(&id).await.unwrap().unwrap();
    assert!(!backend.insert_record(&node).unwrap());
    assert_eq!(backend.insert_records_batch(&[node.clone(), node]).unwrap(), 0);
    assert_eq!(backend.get_stats().unwrap().record_count, 1);
}

#[tokio::test]
async fn test_data_survives_reopen() {
    let dir = tempdir().unwrap();
    let config = MemoryConfig::sqlite(dir.path().join("m.db"));

    let id = {
        let backend = open(&config);
        let id = backend
            .store("durable fact", MetadataInput::default().with_scope(Scope::project("p1")))
            .await
            .unwrap();
        backend.close().unwrap();
        id
    };

    let backend = open(&config);
    let node = backend.get(&id).await.unwrap().unwrap();
    assert_eq!(node.content, "durable fact");
    let hits = backend
        .search_records("durable", &RecordQueryFilters::default())
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test]
async fn test_secrets_are_not_searchable() {
    let dir = tempdir().unwrap();
    let backend = open(&MemoryConfig::sqlite(dir.path().join("m.db")));

    let id = backend
        .store(
            "deploy with password=hunter2secret",
            MetadataInput::default(),
        )
        .await
        .unwrap();

    assert!(backend
        .search_records("hunter2secret", &RecordQueryFilters::default())
        .unwrap()
        .is_empty());
    // The stored node keeps the original content
    let node = backend.get(&id).await.unwrap().unwrap();
    assert!(node.content.contains("hunter2secret"));
}

#[test]
fn test_trace_batch_and_range_query() {
    let dir = tempdir().unwrap();
    let backend = open(&MemoryConfig::sqlite(dir.path().join("m.db")));

    let events = vec![
        TraceEvent::new("tool_call", serde_json::json!({"tool": "grep"})).with_session("s1"),
        TraceEvent::new("tool_result", serde_json::json!({"ok": true})).with_session("s1"),
        TraceEvent::new("tool_call", serde_json::json!({"tool": "ls"})),
    ];
    assert_eq!(backend.insert_trace_events_batch(&events).unwrap(), 3);
    assert_eq!(backend.insert_trace_events_batch(&events).unwrap(), 0);

    let calls = backend
        .get_trace_events_by_date_range(0, i64::MAX, Some("tool_call"), None)
        .unwrap();
    assert_eq!(calls.len(), 2);
    assert_eq!(backend.get_stats().unwrap().trace_count, 3);
}

#[test]
fn test_health_reports_details() {
    let dir = tempdir().unwrap();
    let backend = open(&MemoryConfig::sqlite(dir.path().join("m.db")));

    let health = backend.health_check();
    assert_eq!(health.status, HealthStatus::Healthy);
    let details = health.details.unwrap();
    assert!(details.db_path.unwrap().ends_with("m.db"));
    assert!(!details.vector_available);

    backend.close().unwrap();
    assert_eq!(backend.health_check().status, HealthStatus::Unhealthy);
}

#[test]
fn test_enable_vector_uses_bundled_module() {
    let dir = tempdir().unwrap();
    let mut config = MemoryConfig::sqlite(dir.path().join("m.db"));
    config.enable_vector = true;
    config.embedding_dimensions = 4;
    let backend = open(&config);

    assert!(backend.vector_available());
    assert!(backend.insert_embedding("a", &[1.0, 0.0, 0.0, 0.0]).unwrap());
    let hits = backend.search_by_vector(&[1.0, 0.0, 0.0, 0.0], None).unwrap();
    assert_eq!(hits[0].record_id, "a");
}
