//! Backend builders shared by the integration tests.

use agent_memory::{create_memory_service, MemoryBackend, MemoryConfig};
use tempfile::TempDir;

/// In-process backend plus a SQLite backend in a fresh temp dir.
///
/// The `TempDir` must outlive the durable backend.
pub async fn both_backends(config: MemoryConfig) -> (Vec<MemoryBackend>, TempDir) {
    let dir = tempfile::tempdir().unwrap();
    let in_process = create_memory_service(&config).await.unwrap();
    let durable = create_memory_service(&MemoryConfig {
        backend: agent_memory::BackendKind::Sqlite,
        db_path: Some(dir.path().join("memory.db")),
        ..config
    })
    .await
    .unwrap();
    (vec![in_process, durable], dir)
}
