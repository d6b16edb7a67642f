// src/core/plan_builder.rs

//! Turns a `ResolvedEnvironment` into an `ExecutionPlan`.
//!
//! The plan is plain data. Everything that depends on the outside world (the
//! process environment, positional arguments, the location of the config
//! file) comes in through the `SubstitutionContext`, so building the same
//! environment twice with the same context yields the same plan.

use crate::constants::{DEFAULT_PASSENV, WINDOWS_PASSENV};
use crate::core::cache::{self, InstallRecipe};
use crate::core::errors::{ConfigError, ConfigResult};
use crate::core::interpolator::{EnvPaths, Interpolator, SubstitutionContext, absolutize};
use crate::models::{ExecutionPlan, PlannedCommand, ResolvedEnvironment};
use std::collections::BTreeMap;

/// Variables always set for a command, besides `PATH`.
pub const VIRTUAL_ENV_VAR: &str = "VIRTUAL_ENV";
pub const ENV_NAME_VAR: &str = "ENVMATRIX_ENV_NAME";
pub const ENV_DIR_VAR: &str = "ENVMATRIX_ENV_DIR";

/// Builds the execution plan for one environment.
pub fn build_plan(env: &ResolvedEnvironment, ctx: &SubstitutionContext) -> ConfigResult<ExecutionPlan> {
    log::debug!("Building execution plan for '{}'", env.name);
    let paths = EnvPaths::resolve(ctx, env)?;
    let bindings = build_bindings(env, ctx, &paths)?;
    let interp = Interpolator::new(ctx).for_environment(&paths).with_layer(&bindings);

    let cwd = absolutize(ctx.toxinidir(), &interp.expand(&env.changedir)?);

    let mut deps = Vec::with_capacity(env.deps.len());
    for dep in &env.deps {
        let expanded = interp.expand(dep)?;
        let expanded = expanded.trim();
        if !expanded.is_empty() {
            deps.push(expanded.to_string());
        }
    }

    let mut commands = Vec::with_capacity(env.commands.len());
    for raw in &env.commands {
        if let Some(command) = plan_command(&env.name, raw, &interp)? {
            log::trace!("  [{}] command: {:?}", env.name, command.argv);
            commands.push(command);
        }
    }

    let fingerprint = cache::fingerprint(&InstallRecipe {
        interpreter: env.basepython.as_deref(),
        deps: &deps,
        extras: &env.extras,
        usedevelop: env.usedevelop,
        skip_install: env.skip_install,
    })
    .map_err(|e| ConfigError::Fingerprint {
        env: env.name.clone(),
        message: format!("{:#}", e),
    })?;

    Ok(ExecutionPlan {
        env_name: env.name.clone(),
        cwd,
        envdir: paths.envdir.clone(),
        interpreter: env.basepython.clone(),
        bindings,
        deps,
        commands,
        ignore_errors: env.ignore_errors,
        ignore_outcome: env.ignore_outcome,
        fingerprint,
    })
}

/// Computes the variables a command runs with.
///
/// Order of layers: passed-through outer variables, the fixed environment
/// variables (`VIRTUAL_ENV`, `PATH`, ...), then `setenv` entries in
/// declaration order. A `setenv` value can see everything set before it.
fn build_bindings(
    env: &ResolvedEnvironment,
    ctx: &SubstitutionContext,
    paths: &EnvPaths,
) -> ConfigResult<BTreeMap<String, String>> {
    let mut bindings: BTreeMap<String, String> = ctx
        .environ()
        .iter()
        .filter(|(name, _)| is_passed_through(name, &env.passenv))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    let envdir = paths.envdir.to_string_lossy().into_owned();
    bindings.insert(VIRTUAL_ENV_VAR.to_string(), envdir.clone());
    bindings.insert(ENV_NAME_VAR.to_string(), env.name.clone());
    bindings.insert(ENV_DIR_VAR.to_string(), envdir);

    let bin_dir = paths.bin_dir().to_string_lossy().into_owned();
    let sep = if cfg!(windows) { ";" } else { ":" };
    let path = match bindings.get("PATH").filter(|p| !p.is_empty()) {
        Some(outer) => format!("{}{}{}", bin_dir, sep, outer),
        None => bin_dir,
    };
    bindings.insert("PATH".to_string(), path);

    for binding in &env.setenv {
        let value = Interpolator::new(ctx)
            .for_environment(paths)
            .with_layer(&bindings)
            .expand(&binding.value)?;
        bindings.insert(binding.name.clone(), value);
    }
    Ok(bindings)
}

/// True if an outer variable is let through, by default or by a `passenv` pattern.
/// A pattern ending in `*` matches by prefix.
pub fn is_passed_through(name: &str, passenv: &[String]) -> bool {
    let is_default = DEFAULT_PASSENV.contains(&name) || (cfg!(windows) && WINDOWS_PASSENV.contains(&name));
    is_default
        || passenv.iter().any(|pattern| match pattern.strip_suffix('*') {
            Some(prefix) => name.starts_with(prefix),
            None => pattern == name,
        })
}

/// Substitutes and tokenizes one command line. Returns `None` for lines that end up empty.
fn plan_command(env_name: &str, raw: &str, interp: &Interpolator<'_>) -> ConfigResult<Option<PlannedCommand>> {
    let raw = raw.trim();
    // The ignore marker is read before substitution so positional arguments can't introduce it.
    let (raw, ignore_exit) = match raw.strip_prefix('-') {
        Some(rest) => (rest.trim_start(), true),
        None => (raw, false),
    };

    let display = interp.with_posargs_quoting(true).expand(raw)?.trim().to_string();
    if display.is_empty() {
        return Ok(None);
    }
    let argv = shlex::split(&display).ok_or_else(|| ConfigError::MalformedCommand {
        env: env_name.to_string(),
        command: display.clone(),
    })?;
    if argv.is_empty() {
        return Ok(None);
    }
    Ok(Some(PlannedCommand {
        argv,
        display,
        ignore_exit,
    }))
}
