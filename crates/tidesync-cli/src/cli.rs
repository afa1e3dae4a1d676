use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "tidesync")]
#[command(about = "Replicate a local record store with a Tidesync service")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Settings JSON (app id, access key, endpoint)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Record schema JSON
    #[arg(long, global = true, value_name = "PATH")]
    pub schema: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run one sync cycle
    Sync {
        /// Keep polling until interrupted
        #[arg(long)]
        watch: bool,
        /// Output the cycle report as JSON
        #[arg(long, conflicts_with = "watch")]
        json: bool,
    },
    /// Manage visibility group subscriptions
    Group {
        #[command(subcommand)]
        command: GroupCommands,
    },
    /// Show device id and queue state
    Status {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
pub enum GroupCommands {
    /// Subscribe to a group
    Add {
        /// Group name
        name: String,
    },
    /// Unsubscribe from a group and drop its local records
    Remove {
        /// Group name
        name: String,
    },
    /// List subscribed groups
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}
