//! Tidesync CLI - operator commands for a local replica
//!
//! Runs sync cycles, manages visibility group subscriptions and reports
//! queue state for the store at `--db-path`.

mod cli;
mod commands;
mod error;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands, GroupCommands};
use crate::commands::common::{open_context, CliPaths};
use crate::commands::group::{run_group_add, run_group_list, run_group_remove};
use crate::commands::status::run_status;
use crate::commands::sync::{run_sync, run_watch};
use crate::error::CliError;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        eprintln!("Error: {error}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), CliError> {
    dotenvy::dotenv().ok();

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("tidesync=info,tidesync_core=info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let paths = CliPaths::resolve(cli.db_path, cli.config, cli.schema)?;
    let context = open_context(&paths)?;

    match cli.command {
        Commands::Sync { watch: false, json } => run_sync(&context, json).await?,
        Commands::Sync { watch: true, .. } => run_watch(&context).await?,
        Commands::Group { command } => match command {
            GroupCommands::Add { name } => run_group_add(&context, &name)?,
            GroupCommands::Remove { name } => run_group_remove(&context, &name)?,
            GroupCommands::List { json } => run_group_list(&context, json)?,
        },
        Commands::Status { json } => run_status(&context, json)?,
    }

    Ok(())
}
