//! # envmatrix
//!
//! A resolver for tox-style test matrices. It expands brace-factor envlist
//! patterns into concrete environments, picks the configuration lines whose
//! factor conditions match each environment, merges base and per-environment
//! sections, substitutes placeholders and finally produces inert execution
//! plans that an executor can run.

use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// A per-environment cancellation flag. Each execution plan gets its own token,
/// so cancelling one environment never affects its siblings.
pub type CancellationToken = Arc<AtomicBool>;

pub mod cli;
pub mod constants;
pub mod core;
pub mod models;
pub mod system;
