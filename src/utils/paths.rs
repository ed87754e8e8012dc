//! Cross-Platform Path Utilities
//!
//! Functions for resolving the memory store's directories across platforms.
//! Handles ~/.agent-memory/ and its config/database files.

use std::path::{Path, PathBuf};

use crate::utils::error::{AppError, AppResult};

/// Get the user's home directory
pub fn home_dir() -> AppResult<PathBuf> {
    dirs::home_dir().ok_or_else(|| AppError::config("Could not determine home directory"))
}

/// Get the memory data directory (~/.agent-memory/)
pub fn memory_dir() -> AppResult<PathBuf> {
    Ok(home_dir()?.join(".agent-memory"))
}

/// Get the config file path (~/.agent-memory/config.json)
pub fn config_path() -> AppResult<PathBuf> {
    Ok(memory_dir()?.join("config.json"))
}

/// Get the database file path (~/.agent-memory/memory.db)
pub fn database_path() -> AppResult<PathBuf> {
    Ok(memory_dir()?.join("memory.db"))
}

/// Ensure a directory exists, creating it (owner-only on unix) if necessary
pub fn ensure_private_dir(path: &Path) -> AppResult<()> {
    if path.exists() {
        return Ok(());
    }
    let mut builder = std::fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o700);
    }
    builder.create(path)?;
    Ok(())
}

/// Ensure the parent directory of a file path exists
pub fn ensure_parent_dir(file: &Path) -> AppResult<()> {
    match file.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => ensure_private_dir(parent),
        _ => Ok(()),
    }
}

/// Get the memory data directory, creating if it doesn't exist
pub fn ensure_memory_dir() -> AppResult<PathBuf> {
    let path = memory_dir()?;
    ensure_private_dir(&path)?;
    Ok(path)
}
