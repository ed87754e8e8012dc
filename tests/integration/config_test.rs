//! Config Integration Tests

use agent_memory::{
    create_memory_service, BackendKind, ConfigService, MemoryService, MetadataInput,
    SettingsUpdate,
};
use tempfile::tempdir;

#[tokio::test]
async fn test_config_file_selects_backend() {
    let dir = tempdir().unwrap();
    let mut service = ConfigService::open(dir.path().join("config.json")).unwrap();
    assert_eq!(service.get_config().backend, BackendKind::InProcess);

    service
        .update_config(SettingsUpdate {
            backend: Some(BackendKind::Sqlite),
            db_path: Some(dir.path().join("data").join("memory.db")),
            ..Default::default()
        })
        .unwrap();

    let reopened = ConfigService::open(dir.path().join("config.json")).unwrap();
    let backend = create_memory_service(reopened.get_config()).await.unwrap();
    assert_eq!(backend.kind(), BackendKind::Sqlite);
    backend.store("configured", MetadataInput::default()).await.unwrap();
    assert!(dir.path().join("data").join("memory.db").exists());
}

#[test]
fn test_invalid_update_is_not_persisted() {
    let dir = tempdir().unwrap();
    let mut service = ConfigService::open(dir.path().join("config.json")).unwrap();

    let result = service.update_config(SettingsUpdate {
        embedding_dimensions: Some(0),
        ..Default::default()
    });
    assert!(result.is_err());
    assert_eq!(service.get_config().embedding_dimensions, 512);

    service.reload().unwrap();
    assert_eq!(service.get_config().embedding_dimensions, 512);
}
