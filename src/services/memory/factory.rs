//! Backend selection.
//!
//! `create_memory_service` turns a `MemoryConfig` into a ready-to-use backend.
//! The durable backend is initialized before it is returned.

use agent_memory_core::{MemoryFilters, MemoryNode, MemorySearchResult, MetadataInput, Scope};
use async_trait::async_trait;

use super::in_process::InProcessMemoryStore;
use super::service::{DeleteScopeOptions, MemoryService, ScopedRetrieveOptions, StoreItem};
use super::sqlite::SqliteMemoryBackend;
use crate::models::settings::{BackendKind, MemoryConfig};
use crate::utils::error::{AppError, AppResult};

/// A configured backend
#[derive(Debug)]
pub enum MemoryBackend {
    InProcess(InProcessMemoryStore),
    Durable(SqliteMemoryBackend),
}

impl MemoryBackend {
    pub fn kind(&self) -> BackendKind {
        match self {
            MemoryBackend::InProcess(_) => BackendKind::InProcess,
            MemoryBackend::Durable(_) => BackendKind::Sqlite,
        }
    }

    /// The durable backend, for its record/trace/stats surface
    pub fn as_durable(&self) -> Option<&SqliteMemoryBackend> {
        match self {
            MemoryBackend::Durable(backend) => Some(backend),
            MemoryBackend::InProcess(_) => None,
        }
    }

    fn service(&self) -> &dyn MemoryService {
        match self {
            MemoryBackend::InProcess(store) => store,
            MemoryBackend::Durable(backend) => backend,
        }
    }
}

/// Validate `config` and build the backend it names.
pub async fn create_memory_service(config: &MemoryConfig) -> AppResult<MemoryBackend> {
    config.validate().map_err(AppError::config)?;

    match config.backend {
        BackendKind::InProcess => {
            tracing::info!("[MemoryStore] Using in-process backend");
            Ok(MemoryBackend::InProcess(InProcessMemoryStore::new(config)))
        }
        BackendKind::Sqlite => {
            let backend = SqliteMemoryBackend::new(config)?;
            backend.init()?;
            Ok(MemoryBackend::Durable(backend))
        }
    }
}

#[async_trait]
impl MemoryService for MemoryBackend {
    async fn store(&self, content: &str, metadata: MetadataInput) -> AppResult<String> {
        self.service().store(content, metadata).await
    }

    async fn store_batch(&self, items: Vec<StoreItem>) -> AppResult<Vec<String>> {
        self.service().store_batch(items).await
    }

    async fn get(&self, id: &str) -> AppResult<Option<MemoryNode>> {
        self.service().get(id).await
    }

    async fn retrieve(
        &self,
        query: &str,
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemorySearchResult>> {
        self.service().retrieve(query, filters, limit).await
    }

    async fn retrieve_scoped(
        &self,
        query: &str,
        scope: &Scope,
        options: &ScopedRetrieveOptions,
    ) -> AppResult<Vec<MemorySearchResult>> {
        self.service().retrieve_scoped(query, scope, options).await
    }

    async fn search_keywords(
        &self,
        keywords: &[String],
        filters: &MemoryFilters,
        limit: Option<usize>,
    ) -> AppResult<Vec<MemoryNode>> {
        self.service().search_keywords(keywords, filters, limit).await
    }

    async fn forget(&self, id: &str) -> AppResult<bool> {
        self.service().forget(id).await
    }

    async fn forget_user(&self, user_id: &str) -> AppResult<usize> {
        self.service().forget_user(user_id).await
    }

    async fn delete_by_scope(&self, scope: &Scope, options: DeleteScopeOptions) -> AppResult<usize> {
        self.service().delete_by_scope(scope, options).await
    }

    async fn compact(&self, user_id: Option<&str>) -> AppResult<usize> {
        self.service().compact(user_id).await
    }
}
