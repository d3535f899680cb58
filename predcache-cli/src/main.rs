//! predcache CLI - Command-line interface
//!
//! Drives the prediction tile cache against a synthetic volume and manages
//! its configuration file.

mod commands;
mod error;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use commands::config::ConfigCommands;
use commands::simulate::SimulateArgs;

#[derive(Parser)]
#[command(name = "predcache")]
#[command(version = predcache::VERSION)]
#[command(about = "Generation-scoped cache for incrementally trained volume predictions", long_about = None)]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage the configuration file
    #[command(subcommand)]
    Config(ConfigCommands),

    /// Render a synthetic volume while retraining the classifier
    Simulate(SimulateArgs),
}

fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Config(command) => commands::config::run(command, cli.config),
        Commands::Simulate(args) => commands::simulate::run(args, cli.config),
    };

    if let Err(e) = result {
        e.exit();
    }
}
