// src/cli/handlers/run.rs

use anyhow::{Context, Result};
use colored::*;
use rayon::prelude::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    CancellationToken,
    cli::{
        args::RunArgs,
        handlers::commons::{self, AppContext, RunFailure},
    },
    core::{
        cache::{self, EnvState},
        errors::ConfigError,
    },
    models::{EnvironmentId, ExecutionPlan},
    system::executor::{self, ExecutionError, PlanStatus},
};

/// The result of one environment, as shown in the summary.
#[derive(Debug)]
enum EnvOutcome {
    Ran(executor::PlanReport),
    Skipped { env_name: String, reason: String },
    MissingInterpreter { env_name: String, interpreter: String },
}

impl EnvOutcome {
    fn is_failure(&self) -> bool {
        match self {
            Self::Ran(report) => report.status == PlanStatus::Failed,
            Self::Skipped { .. } => false,
            Self::MissingInterpreter { .. } => true,
        }
    }
}

/// Main entry point for the `run` command.
///
/// Every selected environment is resolved and planned first. Only then are
/// the plans run, one after the other or on a rayon pool with `--parallel`.
/// Each plan gets its own cancellation token.
pub fn handle(app: &AppContext, args: RunArgs, cancellation_token: &CancellationToken) -> Result<()> {
    let ws = commons::load_workspace(app)?;
    let ids = ws.select(&commons::selection_from(args.select.env.as_deref()))?;
    let strict = args.strict || app.settings.strict;
    let ctx = ws.substitution_context(commons::environ_snapshot(), args.posargs)?;
    let selection = commons::build_plans(&ws, &ids, &ctx, &app.settings, strict)?;

    let outer_path = ctx.environ().get("PATH").cloned();
    let skip_missing = ws.matrix().skip_missing_interpreters;
    let parallel = args.parallel.or(app.settings.parallel).unwrap_or(1).max(1);

    let tokens: Vec<CancellationToken> = selection
        .plans
        .iter()
        .map(|_| Arc::new(AtomicBool::new(false)))
        .collect();
    let run_one = |(plan, token): (&ExecutionPlan, &CancellationToken)| -> Result<EnvOutcome, ExecutionError> {
        executor::check_for_cancellation(cancellation_token)?;
        run_with_siblings(plan, token, &tokens, outer_path.as_deref(), skip_missing)
    };

    let results: Vec<Result<EnvOutcome, ExecutionError>> = if parallel > 1 && selection.plans.len() > 1 {
        log::debug!("Running {} environment(s) on {} threads", selection.plans.len(), parallel);
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(parallel)
            .build()
            .context("Failed to start the worker pool")?;
        pool.install(|| selection.plans.par_iter().zip(tokens.par_iter()).map(run_one).collect())
    } else {
        selection.plans.iter().zip(tokens.iter()).map(run_one).collect()
    };

    let mut outcomes = Vec::with_capacity(results.len());
    for result in results {
        outcomes.push(result?);
    }

    print_summary(&outcomes, &selection.errors);

    if !selection.errors.is_empty() {
        return Err(RunFailure::ConfigErrors {
            count: selection.errors.len(),
        }
        .into());
    }
    let failed = outcomes.iter().filter(|o| o.is_failure()).count();
    if failed > 0 {
        return Err(RunFailure::TestsFailed { count: failed }.into());
    }
    Ok(())
}

/// Runs one environment. A command killed by SIGINT sets every token in
/// `siblings`, so the environments still queued or running stop as well.
fn run_with_siblings(
    plan: &ExecutionPlan,
    token: &CancellationToken,
    siblings: &[CancellationToken],
    outer_path: Option<&str>,
    skip_missing: bool,
) -> Result<EnvOutcome, ExecutionError> {
    let outcome = run_environment(plan, token, outer_path, skip_missing);
    if matches!(outcome, Err(ExecutionError::Interrupted { .. })) {
        for sibling in siblings {
            sibling.store(true, Ordering::Relaxed);
        }
    }
    outcome
}

fn run_environment(
    plan: &ExecutionPlan,
    token: &CancellationToken,
    outer_path: Option<&str>,
    skip_missing: bool,
) -> Result<EnvOutcome, ExecutionError> {
    if let Some(interpreter) = &plan.interpreter
        && executor::find_executable(interpreter, outer_path).is_none()
    {
        if skip_missing {
            return Ok(EnvOutcome::Skipped {
                env_name: plan.env_name.clone(),
                reason: format!("interpreter '{}' not found", interpreter),
            });
        }
        return Ok(EnvOutcome::MissingInterpreter {
            env_name: plan.env_name.clone(),
            interpreter: interpreter.clone(),
        });
    }

    let previous = cache::read_state(&plan.envdir).unwrap_or_else(|e| {
        log::warn!("[{}] ignoring unreadable state: {:#}", plan.env_name, e);
        None
    });
    if cache::needs_reinstall(previous.as_ref(), &plan.fingerprint) {
        println!(
            "{} {}",
            format!("{}:", plan.env_name).cyan().bold(),
            "environment configuration changed; dependencies need reinstalling".yellow()
        );
    }

    let report = executor::run_plan(plan, token, |command| {
        println!(
            "{} {} {}",
            plan.env_name.cyan().bold(),
            "run-test:".dimmed(),
            command.display
        );
    })?;

    if let Err(e) = cache::write_state(&plan.envdir, &EnvState::now(&plan.env_name, &plan.fingerprint, report.outcome())) {
        log::warn!("[{}] could not record state: {:#}", plan.env_name, e);
    }
    Ok(EnvOutcome::Ran(report))
}

fn print_summary(outcomes: &[EnvOutcome], errors: &[(EnvironmentId, ConfigError)]) {
    println!("{}", format!("{:_^72}", " summary ").bold());
    for outcome in outcomes {
        match outcome {
            EnvOutcome::Ran(report) => match report.status {
                PlanStatus::Passed => println!("  {}: {}", report.env_name, "commands succeeded".green()),
                PlanStatus::FailureIgnored => println!(
                    "  {}: {}",
                    report.env_name,
                    "commands failed; ignored (ignore_outcome)".yellow()
                ),
                PlanStatus::Failed => println!(
                    "{} {}: {} ({})",
                    "ERROR:".red().bold(),
                    report.env_name,
                    "commands failed".red(),
                    report.failures.join("; ")
                ),
                PlanStatus::Cancelled => println!("  {}: {}", report.env_name, "cancelled".yellow()),
            },
            EnvOutcome::Skipped { env_name, reason } => {
                println!("  {}: {} ({})", env_name, "SKIP".yellow(), reason);
            }
            EnvOutcome::MissingInterpreter { env_name, interpreter } => println!(
                "{} {}: {}",
                "ERROR:".red().bold(),
                env_name,
                format!("InterpreterNotFound: {}", interpreter).red()
            ),
        }
    }
    for (id, error) in errors {
        println!("{} {}: {}", "ERROR:".red().bold(), id, error.to_string().red());
    }

    let all_good = errors.is_empty()
        && outcomes
            .iter()
            .all(|o| !o.is_failure() && !matches!(o, EnvOutcome::Ran(r) if r.status == PlanStatus::Cancelled));
    if all_good && !outcomes.is_empty() {
        println!("  {}", "congratulations :)".green().bold());
    }
}
