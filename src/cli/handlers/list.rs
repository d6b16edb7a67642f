// src/cli/handlers/list.rs

use anyhow::Result;
use colored::Colorize;

use crate::{
    cli::{args::ListArgs, handlers::commons::{self, AppContext}},
    models::EnvironmentId,
};

pub fn handle(app: &AppContext, args: ListArgs) -> Result<()> {
    let ws = commons::load_workspace(app)?;
    let ids: &[EnvironmentId] = if args.all || ws.envlist().is_empty() {
        ws.environments()
    } else {
        ws.envlist()
    };

    if args.json {
        let names: Vec<&str> = ids.iter().map(EnvironmentId::name).collect();
        println!("{}", serde_json::to_string_pretty(&names)?);
        return Ok(());
    }

    if ids.is_empty() {
        println!("{}", "No environments defined.".yellow());
        return Ok(());
    }

    let width = ids.iter().map(|id| id.name().len()).max().unwrap_or(0);
    for id in ids {
        // A broken environment is still listed; `show` reports the error.
        let description = match ws.resolve(id) {
            Ok(env) => env.description,
            Err(e) => {
                log::debug!("Could not resolve '{}' for listing: {}", id, e);
                String::new()
            }
        };
        if description.is_empty() {
            println!("{}", id.name().cyan());
        } else {
            println!("{} -> {}", format!("{:<width$}", id.name()).cyan(), description.dimmed());
        }
    }
    Ok(())
}
