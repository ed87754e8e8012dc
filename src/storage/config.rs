//! JSON Configuration Management
//!
//! Handles reading and writing the memory store configuration file.

use std::fs;
use std::path::{Path, PathBuf};

use crate::models::settings::{MemoryConfig, SettingsUpdate};
use crate::utils::error::{AppError, AppResult};
use crate::utils::paths::{config_path, ensure_memory_dir, ensure_parent_dir};

/// Configuration service for managing memory store settings
#[derive(Debug)]
pub struct ConfigService {
    config_path: PathBuf,
    config: MemoryConfig,
}

impl ConfigService {
    /// Load ~/.agent-memory/config.json, creating it with defaults if missing
    pub fn new() -> AppResult<Self> {
        ensure_memory_dir()?;
        Self::open(config_path()?)
    }

    /// Load the config at `path`, creating it with defaults if missing
    pub fn open(path: impl Into<PathBuf>) -> AppResult<Self> {
        let config_path = path.into();
        let config = if config_path.exists() {
            Self::load_from_file(&config_path)?
        } else {
            let default_config = MemoryConfig::default();
            ensure_parent_dir(&config_path)?;
            Self::save_to_file(&config_path, &default_config)?;
            tracing::info!("[ConfigService] Wrote default config to {}", config_path.display());
            default_config
        };

        Ok(Self {
            config_path,
            config,
        })
    }

    /// Load configuration from a file
    fn load_from_file(path: &Path) -> AppResult<MemoryConfig> {
        let content = fs::read_to_string(path)?;
        let config: MemoryConfig = serde_json::from_str(&content)?;
        config.validate().map_err(AppError::config)?;
        Ok(config)
    }

    /// Save configuration to a file with pretty formatting
    fn save_to_file(path: &Path, config: &MemoryConfig) -> AppResult<()> {
        config.validate().map_err(AppError::config)?;
        let content = serde_json::to_string_pretty(config)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Get the current configuration
    pub fn get_config(&self) -> &MemoryConfig {
        &self.config
    }

    /// Update the configuration with a partial update
    ///
    /// The in-memory config is only replaced once the new one validates.
    pub fn update_config(&mut self, update: SettingsUpdate) -> AppResult<MemoryConfig> {
        let mut next = self.config.clone();
        next.apply_update(update);
        Self::save_to_file(&self.config_path, &next)?;
        self.config = next;
        Ok(self.config.clone())
    }

    /// Reload configuration from disk
    pub fn reload(&mut self) -> AppResult<()> {
        self.config = Self::load_from_file(&self.config_path)?;
        Ok(())
    }

    /// Reset configuration to defaults
    pub fn reset(&mut self) -> AppResult<()> {
        self.config = MemoryConfig::default();
        Self::save_to_file(&self.config_path, &self.config)
    }
}
