// src/core/errors.rs

use std::path::PathBuf;
use thiserror::Error;

/// Every way resolving a matrix configuration can fail.
///
/// These are all configuration errors: the CLI maps any of them to the
/// configuration-error exit code, apart from command failures reported by the
/// executor.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The configuration text could not be read as sections and keys.
    #[error("Malformed configuration at line {line}: {message}")]
    MalformedConfig { line: usize, message: String },

    /// An envlist or conditional-key pattern violates the factor grammar.
    #[error("Malformed pattern '{pattern}': {reason}")]
    MalformedPattern { pattern: String, reason: String },

    /// A requested environment is not declared anywhere.
    #[error("Unknown environment '{name}'. Known environments: {known}")]
    UnknownEnvironment { name: String, known: String },

    /// Two equally specific conditional lines set a scalar to different values.
    #[error(
        "Conflicting values for '{setting}' in environment '{env}': '{first}' and '{second}' are equally specific"
    )]
    ConflictingScalarAssignment {
        env: String,
        setting: String,
        first: String,
        second: String,
    },

    /// A `{...}` token is neither built-in, `env:` nor `posargs`.
    #[error("Unresolved placeholder '{{{token}}}' in '{text}'")]
    UnresolvedPlaceholder { token: String, text: String },

    /// A `{[section]key}` reference points at nothing.
    #[error("Reference '{{[{section}]{key}}}' does not name an existing setting")]
    UnknownReference { section: String, key: String },

    /// `{[section]key}` references form a cycle.
    #[error("Circular reference detected: {cycle_path}")]
    CircularReference { cycle_path: String },

    /// A substituted command line could not be tokenized.
    #[error("Command could not be parsed in environment '{env}': {command}")]
    MalformedCommand { env: String, command: String },

    /// A boolean setting holds something other than a boolean.
    #[error("Invalid boolean '{value}' for '{setting}' in environment '{env}'")]
    InvalidFlag {
        env: String,
        setting: String,
        value: String,
    },

    /// The install recipe of an environment could not be hashed.
    #[error("Could not fingerprint environment '{env}': {message}")]
    Fingerprint { env: String, message: String },

    /// No configuration file could be found.
    #[error("No '{filename}' found in '{}' or any parent directory", .start.display())]
    ConfigNotFound { filename: String, start: PathBuf },

    /// The configuration file could not be read.
    #[error("Could not read configuration '{}': {message}", .path.display())]
    Io { path: PathBuf, message: String },
}

/// Result alias used throughout the resolver.
pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub(crate) fn malformed_pattern(pattern: &str, reason: impl Into<String>) -> Self {
        Self::MalformedPattern {
            pattern: pattern.to_string(),
            reason: reason.into(),
        }
    }
}
