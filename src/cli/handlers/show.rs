// src/cli/handlers/show.rs

use anyhow::Result;
use colored::Colorize;

use crate::{
    cli::{
        args::ShowArgs,
        handlers::commons::{self, AppContext, RunFailure},
    },
    models::ResolvedEnvironment,
};

pub fn handle(app: &AppContext, args: ShowArgs) -> Result<()> {
    let ws = commons::load_workspace(app)?;
    let ids = ws.select(&commons::selection_from(args.select.env.as_deref()))?;

    let mut resolved = Vec::with_capacity(ids.len());
    let mut errors = 0;
    for (id, result) in ws.resolve_selection(&ids, app.settings.strict)? {
        match result {
            Ok(mut env) => {
                commons::apply_user_passenv(&mut env, &app.settings);
                resolved.push(env);
            }
            Err(e) => {
                commons::print_config_error(&id, &e);
                errors += 1;
            }
        }
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&resolved)?);
    } else {
        for env in &resolved {
            print_environment(env, ws.override_section(&env.name));
        }
    }

    if errors > 0 {
        return Err(RunFailure::ConfigErrors { count: errors }.into());
    }
    Ok(())
}

fn print_environment(env: &ResolvedEnvironment, override_section: Option<&str>) {
    println!("{}", format!("[testenv:{}]", env.name).yellow().bold());
    field("factors", &env.factors.join(", "));
    if let Some(section) = override_section {
        field("section", &format!("[{}]", section));
    }
    if !env.description.is_empty() {
        field("description", &env.description);
    }
    field("basepython", env.basepython.as_deref().unwrap_or("-"));
    list("deps", &env.deps);
    if !env.extras.is_empty() {
        field("extras", &env.extras.join(", "));
    }
    let setenv: Vec<String> = env.setenv.iter().map(|b| format!("{}={}", b.name, b.value)).collect();
    list("setenv", &setenv);
    if !env.passenv.is_empty() {
        field("passenv", &env.passenv.join(" "));
    }
    list("commands", &env.commands);
    field("changedir", &env.changedir);
    field("envdir", &env.envdir);
    for (name, value) in [
        ("ignore_errors", env.ignore_errors),
        ("ignore_outcome", env.ignore_outcome),
        ("skip_install", env.skip_install),
        ("usedevelop", env.usedevelop),
    ] {
        if value {
            field(name, "True");
        }
    }
    println!();
}

fn field(name: &str, value: &str) {
    println!("  {} = {}", format!("{:<14}", name).cyan(), value);
}

fn list(name: &str, values: &[String]) {
    match values {
        [] => {}
        [single] => field(name, single),
        _ => {
            println!("  {} =", format!("{:<14}", name).cyan());
            for value in values {
                println!("      {}", value);
            }
        }
    }
}
