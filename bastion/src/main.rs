mod commands;
mod logging;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "bastion", version, about = "SSH bastion / jump-server")]
pub struct Cli {
    /// Path to the YAML config file.
    #[arg(short, long, default_value = "bastion.yaml", global = true)]
    pub config: PathBuf,

    /// Repeat for more verbose logging (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the bastion server.
    Run,
    /// Validate the config file without starting anything.
    Check,
    /// Populate the store with demo users, assets and permissions.
    Seed,
    /// Hash a password with bcrypt (reads from stdin if not a tty).
    HashPassword,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    if !matches!(cli.command, Command::Run) {
        logging::init(cli.verbose);
    }

    let result = match cli.command {
        Command::Run => commands::run::command(&cli).await,
        Command::Check => commands::check::command(&cli).await,
        Command::Seed => commands::seed::command(&cli).await,
        Command::HashPassword => commands::hash_password::command().await,
    };

    // A FATAL-level log (spec.md §4.12) must fail the process even when
    // the command itself returned Ok after logging and recovering.
    if bastion_core::logging::fatal_logged() && result.is_ok() {
        std::process::exit(1);
    }

    result
}
