// src/cli/args.rs

use clap::Args;

/// Environment selection shared by every command that works on environments.
#[derive(Args, Debug, Default, Clone)]
pub struct SelectArgs {
    /// Comma-separated environments (brace patterns allowed), or `ALL`.
    /// Falls back to `ENVMATRIX_ENV`, then to the envlist.
    #[arg(short = 'e', long = "env", value_name = "ENVS")]
    pub env: Option<String>,
}

#[derive(Args, Debug, Default)]
pub struct ListArgs {
    /// Also list environments that are only declared by their own section.
    #[arg(long, short)]
    pub all: bool,

    /// Print the names as a JSON array.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct ShowArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Print the resolved environments as JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug, Default)]
pub struct PlanArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Print the plans as JSON.
    #[arg(long)]
    pub json: bool,

    /// Positional arguments substituted for `{posargs}`.
    #[arg(last = true)]
    pub posargs: Vec<String>,
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    #[command(flatten)]
    pub select: SelectArgs,

    /// Run up to N environments at once.
    #[arg(long, short, value_name = "N")]
    pub parallel: Option<usize>,

    /// Abort before running anything if any selected environment fails to resolve.
    #[arg(long)]
    pub strict: bool,

    /// Positional arguments substituted for `{posargs}`.
    #[arg(last = true)]
    pub posargs: Vec<String>,
}
