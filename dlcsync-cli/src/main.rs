//! dlcsync CLI - command-line interface
//!
//! Drives the dlcsync content update pipeline: check for updates, run a full
//! update cycle, inspect the local install and author manifest checksums.

mod commands;
mod error;
mod runner;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand};
use console::style;

use commands::checksum::ChecksumArgs;
use commands::config::ConfigCommands;
use error::CliError;
use runner::CliRunner;

#[derive(Debug, Parser)]
#[command(name = "dlcsync", version, about = "Keep downloadable content in step with a server manifest")]
struct Cli {
    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Check the server manifest and list what would change
    Check,

    /// Download and install all available updates
    Update,

    /// Show installed content and any interrupted download
    Status,

    /// Print manifest checksums for local files
    Checksum {
        /// Files to checksum
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Digest to use (sha1 or sha256); defaults to the configured one
        #[arg(long, conflicts_with = "dlc")]
        algorithm: Option<String>,

        /// Treat paths as relative to the DLC cache
        #[arg(long)]
        dlc: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

fn run(cli: Cli) -> Result<(), CliError> {
    let Cli {
        config,
        verbose,
        command,
    } = cli;

    match command {
        // Config commands must work even when the file is broken
        Commands::Config { command } => {
            let path = config.unwrap_or_else(dlcsync::config::default_config_path);
            commands::config::run(command, &path)
        }
        Commands::Check => commands::check::run(&CliRunner::new(config, verbose)?),
        Commands::Update => commands::update::run(&CliRunner::new(config, verbose)?),
        Commands::Status => commands::status::run(&CliRunner::new(config, verbose)?),
        Commands::Checksum {
            files,
            algorithm,
            dlc,
        } => commands::checksum::run(
            &CliRunner::new(config, verbose)?,
            ChecksumArgs {
                files,
                algorithm,
                dlc,
            },
        ),
    }
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(cli) {
        eprintln!("{} {}", style("error:").red().bold(), e);
        process::exit(e.exit_code());
    }
}
