// src/cli/handlers/mod.rs

// One module per subcommand.

pub mod commons;
pub mod list;
pub mod plan;
pub mod run;
pub mod show;
