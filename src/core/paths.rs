// src/core/paths.rs

use crate::constants::{APP_DIR_NAME, DEFAULT_CONFIG_FILENAME, SETTINGS_FILENAME};
use crate::core::errors::{ConfigError, ConfigResult};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use thiserror::Error;

static APP_CONFIG_DIR: OnceLock<Option<PathBuf>> = OnceLock::new();

#[derive(Error, Debug)]
pub enum PathError {
    #[error("Could not find system config directory.")]
    ConfigDirNotFound,
}

/// Returns the envmatrix user configuration directory (`~/.config/envmatrix`).
///
/// Computed once per process. The directory is not created; nothing is ever written there.
pub fn app_config_dir() -> Result<PathBuf, PathError> {
    APP_CONFIG_DIR
        .get_or_init(|| dirs::config_dir().map(|dir| dir.join(APP_DIR_NAME)))
        .clone()
        .ok_or(PathError::ConfigDirNotFound)
}

/// Returns the path of the user `settings.toml`.
pub fn settings_path() -> Result<PathBuf, PathError> {
    app_config_dir().map(|dir| dir.join(SETTINGS_FILENAME))
}

/// Looks for `tox.ini` in `start` and then in each of its parents.
pub fn find_config_file(start: &Path) -> ConfigResult<PathBuf> {
    let start = dunce::canonicalize(start).map_err(|e| ConfigError::Io {
        path: start.to_path_buf(),
        message: e.to_string(),
    })?;
    for dir in start.ancestors() {
        let candidate = dir.join(DEFAULT_CONFIG_FILENAME);
        log::trace!("Looking for '{}'", candidate.display());
        if candidate.is_file() {
            log::debug!("Found configuration at '{}'", candidate.display());
            return Ok(candidate);
        }
    }
    Err(ConfigError::ConfigNotFound {
        filename: DEFAULT_CONFIG_FILENAME.to_string(),
        start,
    })
}
