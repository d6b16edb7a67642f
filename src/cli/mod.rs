// src/cli/mod.rs

use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub mod args;
pub mod dispatcher;
pub mod handlers;

/// envmatrix: expand, resolve and run tox-style test environment matrices.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    styles = clap::builder::Styles::styled()
        .header(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .usage(clap::builder::styling::AnsiColor::Yellow.on_default().bold())
        .literal(clap::builder::styling::AnsiColor::Cyan.on_default().bold())
        .placeholder(clap::builder::styling::AnsiColor::Green.on_default()),
)]
pub struct Cli {
    /// Configuration file to use instead of searching for `tox.ini`.
    #[arg(short = 'c', long = "config", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List the environments of the matrix.
    #[command(visible_alias = "ls")]
    List(args::ListArgs),
    /// Show the resolved settings of environments.
    #[command(visible_alias = "config")]
    Show(args::ShowArgs),
    /// Show the execution plans without running anything.
    Plan(args::PlanArgs),
    /// Run the commands of the selected environments.
    Run(args::RunArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments_and_posargs() {
        let cli = Cli::try_parse_from([
            "envmatrix", "-c", "ci/tox.ini", "run", "-e", "py27,lint", "-p", "4", "--", "-k", "test_x",
        ])
        .unwrap();
        assert_eq!(cli.config, Some(PathBuf::from("ci/tox.ini")));
        let Commands::Run(run) = cli.command else {
            panic!("expected the run subcommand");
        };
        assert_eq!(run.select.env.as_deref(), Some("py27,lint"));
        assert_eq!(run.parallel, Some(4));
        assert_eq!(run.posargs, vec!["-k", "test_x"]);
    }

    #[test]
    fn test_list_alias_and_flags() {
        let cli = Cli::try_parse_from(["envmatrix", "ls", "--all", "--json"]).unwrap();
        let Commands::List(list) = cli.command else {
            panic!("expected the list subcommand");
        };
        assert!(list.all);
        assert!(list.json);
    }

    #[test]
    fn test_unknown_subcommand_is_rejected() {
        assert!(Cli::try_parse_from(["envmatrix", "frobnicate"]).is_err());
    }
}
