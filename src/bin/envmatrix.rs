// src/bin/envmatrix.rs

use clap::Parser;
use colored::*;
use envmatrix::{
    cli::{Cli, dispatcher, handlers::commons::RunFailure},
    constants::{EXIT_CONFIG_ERROR, EXIT_INTERRUPTED, EXIT_TEST_FAILURE},
    core::{errors::ConfigError, settings::SettingsError},
    system::executor::ExecutionError,
};
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// The main entry point of the `envmatrix` application.
/// It sets up logging, parses arguments, dispatches to the handler and maps
/// errors to exit codes.
fn main() {
    let cancellation_token = Arc::new(AtomicBool::new(false));
    env_logger::init();

    let Err(e) = dispatcher::dispatch(Cli::parse(), &cancellation_token) else {
        return;
    };

    // --- Centralized Error Handling ---
    if let Some(exec_err) = e.downcast_ref::<ExecutionError>()
        && matches!(exec_err, ExecutionError::Interrupted { .. } | ExecutionError::Cancelled)
    {
        // Exit silently, like a shell does after Ctrl+C.
        std::process::exit(EXIT_INTERRUPTED);
    }

    if let Some(failure) = e.downcast_ref::<RunFailure>() {
        eprintln!("\n{}: {}", "Error".red().bold(), failure);
        std::process::exit(match failure {
            RunFailure::ConfigErrors { .. } => EXIT_CONFIG_ERROR,
            RunFailure::TestsFailed { .. } => EXIT_TEST_FAILURE,
        });
    }

    eprintln!("\n{}: {:#}", "Error".red().bold(), e);
    let is_config_error = e.downcast_ref::<ConfigError>().is_some() || e.downcast_ref::<SettingsError>().is_some();
    std::process::exit(if is_config_error { EXIT_CONFIG_ERROR } else { EXIT_TEST_FAILURE });
}
