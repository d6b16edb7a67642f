// src/core/settings.rs

//! User-level defaults, read from `settings.toml` in the envmatrix config dir.
//!
//! ```toml
//! strict = true
//! parallel = 4
//! passenv = ["SSH_AUTH_SOCK", "AWS_*"]
//! color = "never"
//! ```

use crate::core::paths::{self, PathError};
use serde::{Deserialize, Serialize};
use std::{fs, path::Path};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Could not read settings file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Settings file '{path}' is not valid: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
    #[error(transparent)]
    Path(#[from] PathError),
}

/// When to colorize terminal output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorChoice {
    #[default]
    Auto,
    Always,
    Never,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserSettings {
    /// Abort on the first configuration error instead of skipping the environment.
    pub strict: bool,
    /// Default for `run --parallel`; `None` or 1 means sequential.
    pub parallel: Option<usize>,
    /// Extra `passenv` patterns added to every environment.
    pub passenv: Vec<String>,
    pub color: ColorChoice,
}

impl UserSettings {
    /// Loads the user's settings. A missing file (or config dir) means defaults.
    pub fn load() -> Result<Self, SettingsError> {
        match paths::settings_path() {
            Ok(path) => Self::load_from(&path),
            Err(PathError::ConfigDirNotFound) => {
                log::debug!("No user config directory; using default settings.");
                Ok(Self::default())
            }
        }
    }

    pub fn load_from(path: &Path) -> Result<Self, SettingsError> {
        if !path.exists() {
            log::debug!("No settings file at '{}'; using defaults.", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| SettingsError::Io {
            path: path.display().to_string(),
            source,
        })?;
        let settings: Self = toml::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        log::debug!("Loaded user settings from '{}': {:?}", path.display(), settings);
        Ok(settings)
    }

    /// Applies the color preference to the `colored` crate.
    pub fn apply_color(&self) {
        match self.color {
            ColorChoice::Auto => {}
            ColorChoice::Always => colored::control::set_override(true),
            ColorChoice::Never => colored::control::set_override(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let settings = UserSettings::load_from(&dir.path().join("settings.toml")).unwrap();
        assert_eq!(settings, UserSettings::default());
        assert!(!settings.strict);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "strict = true\nparallel = 4\npassenv = [\"AWS_*\"]\ncolor = \"never\"\n").unwrap();

        let settings = UserSettings::load_from(&path).unwrap();
        assert!(settings.strict);
        assert_eq!(settings.parallel, Some(4));
        assert_eq!(settings.passenv, vec!["AWS_*"]);
        assert_eq!(settings.color, ColorChoice::Never);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("settings.toml");
        fs::write(&path, "strcit = true\n").unwrap();
        assert!(matches!(UserSettings::load_from(&path), Err(SettingsError::Parse { .. })));
    }
}
