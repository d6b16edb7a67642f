// src/core/cache.rs

use crate::constants::STATE_FILENAME;
use anyhow::{Context, Result, anyhow};
use log::debug;
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    time::{SystemTime, UNIX_EPOCH},
};

const HASH_TRUNCATE_LENGTH: usize = 16; // 16 bytes = 32 hex characters

/// The parts of an environment that decide what has to be installed into it.
/// Commands and setenv are not part of it.
#[derive(Debug, Serialize)]
pub struct InstallRecipe<'a> {
    pub interpreter: Option<&'a str>,
    pub deps: &'a [String],
    pub extras: &'a [String],
    pub usedevelop: bool,
    pub skip_install: bool,
}

/// Hashes an install recipe into a short hex fingerprint.
///
/// The recipe is encoded as JSON first. Struct fields serialize in
/// declaration order, so equal recipes always give equal fingerprints.
pub fn fingerprint(recipe: &InstallRecipe<'_>) -> Result<String> {
    let canonical = serde_json::to_vec(recipe).context("Failed to encode the install recipe")?;
    let hash = blake3::hash(&canonical);
    let fingerprint = hex::encode(hash.as_bytes().get(..HASH_TRUNCATE_LENGTH).unwrap_or_default());
    debug!("Install recipe fingerprint: {}", fingerprint);
    Ok(fingerprint)
}

/// How the last run of an environment ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Passed,
    Failed,
    Cancelled,
}

/// What is remembered about an environment between runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvState {
    pub env_name: String,
    pub fingerprint: String,
    pub outcome: RunOutcome,
    /// Seconds since the Unix epoch.
    pub finished_at: u64,
}

impl EnvState {
    pub fn now(env_name: &str, fingerprint: &str, outcome: RunOutcome) -> Self {
        let finished_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or_default();
        Self {
            env_name: env_name.to_string(),
            fingerprint: fingerprint.to_string(),
            outcome,
            finished_at,
        }
    }
}

pub fn state_path(envdir: &Path) -> PathBuf {
    envdir.join(STATE_FILENAME)
}

/// Reads the state record of an environment. `Ok(None)` if it was never run.
pub fn read_state(envdir: &Path) -> Result<Option<EnvState>> {
    let path = state_path(envdir);
    if !path.exists() {
        return Ok(None);
    }
    let bytes = fs::read(&path)
        .with_context(|| format!("Failed to read state file at '{}'", path.display()))?;
    if bytes.is_empty() {
        return Err(anyhow!("State file '{}' is empty.", path.display()));
    }
    let (state, _): (EnvState, usize) =
        bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .context("Failed to deserialize state file. It is likely from an incompatible version of envmatrix.")?;
    Ok(Some(state))
}

/// Writes the state record, creating `envdir` if needed.
pub fn write_state(envdir: &Path, state: &EnvState) -> Result<()> {
    fs::create_dir_all(envdir)
        .with_context(|| format!("Failed to create environment directory '{}'", envdir.display()))?;
    let bytes = bincode::serde::encode_to_vec(state, bincode::config::standard())
        .context("Failed to serialize environment state.")?;
    let path = state_path(envdir);
    fs::write(&path, &bytes)
        .with_context(|| format!("Failed to write state file to '{}'", path.display()))?;
    debug!("Wrote state for '{}' to '{}'", state.env_name, path.display());
    Ok(())
}

/// True when a previous run exists and was built from a different recipe.
pub fn needs_reinstall(previous: Option<&EnvState>, fingerprint: &str) -> bool {
    previous.is_some_and(|state| state.fingerprint != fingerprint)
}
