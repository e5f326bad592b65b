//! Path Utilities
//!
//! Resolves the configuration file location.

use std::path::PathBuf;

use crate::utils::error::AppResult;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "DOCKSIDE_CONFIG";

/// Config file used when `DOCKSIDE_CONFIG` is unset.
pub const DEFAULT_CONFIG_FILE: &str = "dockside.json";

/// Get the config file path (`$DOCKSIDE_CONFIG` or `./dockside.json`)
pub fn config_path() -> PathBuf {
    match std::env::var(CONFIG_PATH_ENV) {
        Ok(path) if !path.trim().is_empty() => PathBuf::from(path.trim()),
        _ => PathBuf::from(DEFAULT_CONFIG_FILE),
    }
}

/// Ensure the parent directory of `path` exists, creating it if necessary
pub fn ensure_parent_dir(path: &std::path::Path) -> AppResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
