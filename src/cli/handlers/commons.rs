// src/cli/handlers/commons.rs

// Helpers shared by the handlers.

use anyhow::{Context, Result};
use colored::Colorize;
use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use thiserror::Error;

use crate::{
    constants::SELECTION_ENV_VAR,
    core::{
        errors::ConfigError,
        paths,
        settings::UserSettings,
        interpolator::SubstitutionContext,
        workspace::{Selection, Workspace},
    },
    models::{EnvironmentId, ExecutionPlan, ResolvedEnvironment},
};

/// What every handler gets from the dispatcher.
#[derive(Debug)]
pub struct AppContext {
    /// `-c FILE`, if given.
    pub config: Option<PathBuf>,
    pub settings: UserSettings,
}

/// Failures reported after every environment had its turn.
/// The binary picks the exit code from the variant.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RunFailure {
    #[error("{count} environment(s) could not be resolved.")]
    ConfigErrors { count: usize },
    #[error("{count} environment(s) failed.")]
    TestsFailed { count: usize },
}

/// Loads the workspace from `-c` or by searching upwards from the current directory.
pub fn load_workspace(app: &AppContext) -> Result<Workspace> {
    let path = match &app.config {
        Some(path) => path.clone(),
        None => {
            let cwd = env::current_dir().context("Failed to read the current directory")?;
            paths::find_config_file(&cwd)?
        }
    };
    Ok(Workspace::load(&path)?)
}

/// `-e` wins over `ENVMATRIX_ENV`; neither means the default selection.
pub fn selection_from(arg: Option<&str>) -> Selection {
    match arg {
        Some(value) => Selection::parse(value),
        None => env::var(SELECTION_ENV_VAR)
            .map(|value| Selection::parse(&value))
            .unwrap_or(Selection::Default),
    }
}

/// A snapshot of the outer process environment.
pub fn environ_snapshot() -> HashMap<String, String> {
    env::vars().collect()
}

/// Adds the user's extra passenv patterns to a resolved environment.
pub fn apply_user_passenv(env: &mut ResolvedEnvironment, settings: &UserSettings) {
    for pattern in &settings.passenv {
        if !env.passenv.contains(pattern) {
            env.passenv.push(pattern.clone());
        }
    }
}

/// Plans for the environments that resolved, and the errors of those that did not.
#[derive(Debug, Default)]
pub struct PlannedSelection {
    pub plans: Vec<ExecutionPlan>,
    pub errors: Vec<(EnvironmentId, ConfigError)>,
}

/// Resolves and plans every selected environment before anything runs.
///
/// With `strict` the first configuration error is returned. Otherwise errors
/// are printed and collected, and the remaining environments still get a plan.
pub fn build_plans(
    ws: &Workspace,
    ids: &[EnvironmentId],
    ctx: &SubstitutionContext,
    settings: &UserSettings,
    strict: bool,
) -> Result<PlannedSelection> {
    let mut selection = PlannedSelection::default();
    for (id, resolved) in ws.resolve_selection(ids, strict)? {
        let planned = resolved.and_then(|mut env| {
            apply_user_passenv(&mut env, settings);
            ws.plan(&env, ctx)
        });
        match planned {
            Ok(plan) => selection.plans.push(plan),
            Err(e) if strict => return Err(e.into()),
            Err(e) => {
                print_config_error(&id, &e);
                selection.errors.push((id, e));
            }
        }
    }
    Ok(selection)
}

pub fn print_config_error(id: &EnvironmentId, error: &ConfigError) {
    eprintln!("{} {}: {}", "ERROR".red().bold(), id.name().cyan(), error);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_explicit_selection_wins() {
        assert_eq!(selection_from(Some("ALL")), Selection::All);
        assert_eq!(
            selection_from(Some("py27,lint")),
            Selection::Names(vec!["py27".to_string(), "lint".to_string()])
        );
    }

    #[test]
    fn test_user_passenv_is_appended_once() {
        let mut env = ResolvedEnvironment {
            name: "py27".to_string(),
            factors: vec!["py27".to_string()],
            description: String::new(),
            basepython: None,
            deps: vec![],
            extras: vec![],
            setenv: vec![],
            passenv: vec!["CI".to_string()],
            commands: vec![],
            changedir: "{toxinidir}".to_string(),
            envdir: "{toxworkdir}{/}{envname}".to_string(),
            ignore_errors: false,
            ignore_outcome: false,
            skip_install: false,
            usedevelop: false,
        };
        let settings = UserSettings {
            passenv: vec!["CI".to_string(), "AWS_*".to_string()],
            ..UserSettings::default()
        };
        apply_user_passenv(&mut env, &settings);
        assert_eq!(env.passenv, vec!["CI", "AWS_*"]);
    }
}
