// src/cli/dispatcher.rs

use anyhow::Result;

use crate::{
    CancellationToken,
    cli::{
        Cli, Commands,
        handlers::{self, commons::AppContext},
    },
    core::settings::UserSettings,
};

/// Routes a parsed command line to its handler.
pub fn dispatch(cli: Cli, cancellation_token: &CancellationToken) -> Result<()> {
    log::debug!("CLI args parsed: {:?}", cli);

    let settings = UserSettings::load()?;
    settings.apply_color();
    let app = AppContext {
        config: cli.config,
        settings,
    };

    match cli.command {
        Commands::List(args) => handlers::list::handle(&app, args),
        Commands::Show(args) => handlers::show::handle(&app, args),
        Commands::Plan(args) => handlers::plan::handle(&app, args),
        Commands::Run(args) => handlers::run::handle(&app, args, cancellation_token),
    }
}
