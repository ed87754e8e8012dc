//! Settings Models
//!
//! Memory store configuration and partial-update structures.

use std::path::PathBuf;

use agent_memory_core::{GovernancePolicy, NormalizeDefaults};
use serde::{Deserialize, Serialize};

/// Which backend `create_memory_service` builds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    InProcess,
    Sqlite,
}

impl Default for BackendKind {
    fn default() -> Self {
        BackendKind::InProcess
    }
}

fn default_ttl_days() -> u32 {
    30
}

fn default_embedding_dimensions() -> usize {
    512
}

fn default_max_results() -> usize {
    500
}

/// Memory store configuration stored in config.json
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Storage backend
    #[serde(default)]
    pub backend: BackendKind,
    /// SQLite file; `None` resolves to ~/.agent-memory/memory.db
    #[serde(default)]
    pub db_path: Option<PathBuf>,
    /// TTL for writes without retention; 0 disables expiry
    #[serde(default = "default_ttl_days")]
    pub default_ttl_days: u32,
    /// Length of every stored embedding
    #[serde(default = "default_embedding_dimensions")]
    pub embedding_dimensions: usize,
    /// Write policy
    #[serde(default = "GovernancePolicy::allow_all")]
    pub governance: GovernancePolicy,
    /// Try to load the vector extension during init
    #[serde(default)]
    pub enable_vector: bool,
    /// Loadable vector extension; `None` probes for a built-in one
    #[serde(default)]
    pub vector_extension_path: Option<PathBuf>,
    /// Ceiling for every list/query result
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::default(),
            db_path: None,
            default_ttl_days: default_ttl_days(),
            embedding_dimensions: default_embedding_dimensions(),
            governance: GovernancePolicy::allow_all(),
            enable_vector: false,
            vector_extension_path: None,
            max_results: default_max_results(),
        }
    }
}

/// Settings update request (partial update)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsUpdate {
    pub backend: Option<BackendKind>,
    pub db_path: Option<PathBuf>,
    pub default_ttl_days: Option<u32>,
    pub embedding_dimensions: Option<usize>,
    pub governance: Option<GovernancePolicy>,
    pub enable_vector: Option<bool>,
    pub vector_extension_path: Option<PathBuf>,
    pub max_results: Option<usize>,
}

impl MemoryConfig {
    /// In-process config, mostly for tests
    pub fn in_process() -> Self {
        Self::default()
    }

    /// SQLite config at `path`
    pub fn sqlite(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Sqlite,
            db_path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn with_governance(mut self, policy: GovernancePolicy) -> Self {
        self.governance = policy;
        self
    }

    pub fn normalize_defaults(&self) -> NormalizeDefaults {
        NormalizeDefaults {
            default_ttl_days: self.default_ttl_days,
        }
    }

    /// Apply a partial update to the configuration
    pub fn apply_update(&mut self, update: SettingsUpdate) {
        if let Some(backend) = update.backend {
            self.backend = backend;
        }
        if let Some(path) = update.db_path {
            self.db_path = Some(path);
        }
        if let Some(days) = update.default_ttl_days {
            self.default_ttl_days = days;
        }
        if let Some(dims) = update.embedding_dimensions {
            self.embedding_dimensions = dims;
        }
        if let Some(policy) = update.governance {
            self.governance = policy;
        }
        if let Some(enable) = update.enable_vector {
            self.enable_vector = enable;
        }
        if let Some(path) = update.vector_extension_path {
            self.vector_extension_path = Some(path);
        }
        if let Some(max) = update.max_results {
            self.max_results = max;
        }
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.embedding_dimensions == 0 {
            return Err("embedding_dimensions must be at least 1".to_string());
        }
        if self.max_results == 0 {
            return Err("max_results must be at least 1".to_string());
        }
        if self.backend == BackendKind::InProcess && self.enable_vector {
            return Err("enable_vector requires the sqlite backend".to_string());
        }
        Ok(())
    }
}
