//! CLI argument parsing

use crate::commands::{self, DebugArgs};
use clap::{Parser, Subcommand};

/// Treblle CLI - inspect the SDK configuration of the current environment
#[derive(Parser, Debug)]
#[command(name = "treblle")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Show the configuration the SDK would run with
    Debug(DebugArgs),
}

impl Cli {
    pub async fn execute(self) -> anyhow::Result<()> {
        match self.command {
            Commands::Debug(args) => commands::debug(args).await,
        }
    }
}
