// src/system/executor.rs

use crate::CancellationToken;
use crate::core::cache::RunOutcome;
use crate::models::{ExecutionPlan, PlannedCommand};
use std::collections::BTreeMap;
use std::env;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::{Command as StdCommand, ExitStatus, Stdio};
use std::sync::atomic::Ordering;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("No command specified to run.")]
    EmptyCommand,
    #[error("Command '{0}' could not be executed: {1}")]
    CommandFailed(String, std::io::Error),
    #[error("Command '{command}' exited with {}.", describe_code(.code))]
    NonZeroExitStatus { command: String, code: Option<i32> },
    #[error("Command '{command}' was interrupted.")]
    Interrupted { command: String },
    #[error("Operation was cancelled by the user.")]
    Cancelled,
}

fn describe_code(code: &Option<i32>) -> String {
    code.map_or_else(|| "no exit code".to_string(), |c| format!("exit code {}", c))
}

/// Returns `Err(Cancelled)` once the token has been set.
pub fn check_for_cancellation(token: &CancellationToken) -> Result<(), ExecutionError> {
    if token.load(Ordering::Relaxed) {
        Err(ExecutionError::Cancelled)
    } else {
        Ok(())
    }
}

/// Runs one tokenized command and waits for it, polling the cancellation token.
///
/// The child sees exactly `env_vars`; nothing else leaks in from the outer environment.
pub fn execute_command(
    argv: &[String],
    cwd: &Path,
    env_vars: &BTreeMap<String, String>,
    cancellation_token: &CancellationToken,
) -> Result<(), ExecutionError> {
    let (program, args) = argv.split_first().ok_or(ExecutionError::EmptyCommand)?;
    let display = argv.join(" ");
    let clean_cwd = dunce::simplified(cwd);

    let mut command = StdCommand::new(program);
    command
        .args(args)
        .current_dir(clean_cwd)
        .env_clear()
        .envs(env_vars)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());

    // Built-ins like `echo` only exist inside cmd.exe; retry through it.
    let mut child = match command.spawn() {
        Ok(child) => child,
        Err(e) if e.kind() == ErrorKind::NotFound && cfg!(target_os = "windows") => {
            log::debug!("Command '{}' not found. Retrying with cmd /C.", program);
            StdCommand::new("cmd")
                .arg("/C")
                .args(argv)
                .current_dir(clean_cwd)
                .env_clear()
                .envs(env_vars)
                .stdout(Stdio::inherit())
                .stderr(Stdio::inherit())
                .spawn()
                .map_err(|e| ExecutionError::CommandFailed(display.clone(), e))?
        }
        Err(e) => return Err(ExecutionError::CommandFailed(display, e)),
    };

    // Non-blocking wait loop to allow for cancellation.
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return check_status(&display, status),
            Ok(None) => {
                if check_for_cancellation(cancellation_token).is_err() {
                    log::debug!(
                        "Cancellation requested, killing child process (PID: {})...",
                        child.id()
                    );
                    if let Err(e) = child.kill() {
                        log::warn!("Failed to kill child process {}: {}", child.id(), e);
                    }
                    child.wait().ok();
                    return Err(ExecutionError::Cancelled);
                }
                std::thread::sleep(Duration::from_millis(50));
            }
            Err(e) => return Err(ExecutionError::CommandFailed(display, e)),
        }
    }
}

fn check_status(display: &str, status: ExitStatus) -> Result<(), ExecutionError> {
    if status.success() {
        return Ok(());
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        // SIGINT: the user pressed Ctrl+C in the shared terminal.
        if status.signal() == Some(2) {
            return Err(ExecutionError::Interrupted {
                command: display.to_string(),
            });
        }
    }
    Err(ExecutionError::NonZeroExitStatus {
        command: display.to_string(),
        code: status.code(),
    })
}

/// How running one plan ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanStatus {
    Passed,
    Failed,
    /// Commands failed but the environment sets `ignore_outcome`.
    FailureIgnored,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlanReport {
    pub env_name: String,
    pub status: PlanStatus,
    /// Display lines of the commands that failed.
    pub failures: Vec<String>,
    pub commands_run: usize,
}

impl PlanReport {
    /// The outcome recorded in the environment's state file.
    pub fn outcome(&self) -> RunOutcome {
        match self.status {
            PlanStatus::Passed | PlanStatus::FailureIgnored => RunOutcome::Passed,
            PlanStatus::Failed => RunOutcome::Failed,
            PlanStatus::Cancelled => RunOutcome::Cancelled,
        }
    }
}

/// Runs a plan's commands in order.
///
/// The first failing command stops the environment, unless the command is
/// marked `ignore_exit` or the plan sets `ignore_errors`. `on_command` is
/// called before each command starts. Only an interrupt is returned as an
/// error; every other failure ends up in the report.
pub fn run_plan(
    plan: &ExecutionPlan,
    cancellation_token: &CancellationToken,
    mut on_command: impl FnMut(&PlannedCommand),
) -> Result<PlanReport, ExecutionError> {
    let mut report = PlanReport {
        env_name: plan.env_name.clone(),
        status: PlanStatus::Passed,
        failures: Vec::new(),
        commands_run: 0,
    };

    for command in &plan.commands {
        if check_for_cancellation(cancellation_token).is_err() {
            report.status = PlanStatus::Cancelled;
            return Ok(report);
        }
        on_command(command);
        report.commands_run += 1;

        match execute_command(&command.argv, &plan.cwd, &plan.bindings, cancellation_token) {
            Ok(()) => {}
            Err(ExecutionError::Cancelled) => {
                report.status = PlanStatus::Cancelled;
                return Ok(report);
            }
            Err(e @ ExecutionError::Interrupted { .. }) => return Err(e),
            Err(e) if command.ignore_exit => {
                log::warn!("[{}] ignoring failure: {}", plan.env_name, e);
            }
            Err(e) => {
                log::debug!("[{}] command failed: {}", plan.env_name, e);
                report.failures.push(command.display.clone());
                if !plan.ignore_errors {
                    break;
                }
            }
        }
    }

    if !report.failures.is_empty() {
        report.status = if plan.ignore_outcome {
            PlanStatus::FailureIgnored
        } else {
            PlanStatus::Failed
        };
    }
    Ok(report)
}

/// Looks an executable up in a `PATH`-style list.
pub fn find_executable(name: &str, path_var: Option<&str>) -> Option<PathBuf> {
    let candidate = Path::new(name);
    if candidate.components().count() > 1 {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }
    let path_var = path_var?;
    env::split_paths(path_var).find_map(|dir| {
        let plain = dir.join(name);
        if plain.is_file() {
            return Some(plain);
        }
        let exe = dir.join(format!("{}.exe", name));
        (cfg!(windows) && exe.is_file()).then_some(exe)
    })
}
