// src/cli/handlers/plan.rs

use anyhow::Result;
use colored::Colorize;

use crate::{
    cli::{
        args::PlanArgs,
        handlers::commons::{self, AppContext, RunFailure},
    },
    models::ExecutionPlan,
};

pub fn handle(app: &AppContext, args: PlanArgs) -> Result<()> {
    let ws = commons::load_workspace(app)?;
    let ids = ws.select(&commons::selection_from(args.select.env.as_deref()))?;
    let ctx = ws.substitution_context(commons::environ_snapshot(), args.posargs)?;
    let selection = commons::build_plans(&ws, &ids, &ctx, &app.settings, app.settings.strict)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&selection.plans)?);
    } else {
        for plan in &selection.plans {
            print_plan(plan);
        }
    }

    if !selection.errors.is_empty() {
        return Err(RunFailure::ConfigErrors {
            count: selection.errors.len(),
        }
        .into());
    }
    Ok(())
}

fn label(name: &str, value: impl std::fmt::Display) {
    println!("  {} {}", format!("{:<12}", name).yellow(), value);
}

fn print_plan(plan: &ExecutionPlan) {
    println!("{} {}", plan.env_name.cyan().bold(), format!("({})", plan.fingerprint).dimmed());
    label("cwd:", plan.cwd.display());
    label("envdir:", plan.envdir.display());
    if let Some(interpreter) = &plan.interpreter {
        label("interpreter:", interpreter);
    }
    if !plan.deps.is_empty() {
        label("deps:", plan.deps.join(" "));
    }
    let mut flags = Vec::new();
    if plan.ignore_errors {
        flags.push("ignore_errors");
    }
    if plan.ignore_outcome {
        flags.push("ignore_outcome");
    }
    if !flags.is_empty() {
        label("flags:", flags.join(", "));
    }
    println!("  {}", "commands:".yellow());
    if plan.commands.is_empty() {
        println!("    {}", "(none)".dimmed());
    }
    for command in &plan.commands {
        let marker = if command.ignore_exit { "-" } else { " " };
        println!("    {} {}", marker.red(), command.display);
    }
    println!();
}
