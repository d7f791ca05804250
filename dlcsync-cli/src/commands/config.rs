//! Configuration management CLI commands.

use std::io;

use clap::Subcommand;
use dlcsync::config::ConfigFile;

use crate::error::CliError;

/// Config subcommands.
#[derive(Debug, Subcommand)]
pub enum ConfigCommands {
    /// Show the configuration file path
    Path,

    /// Print the effective configuration as INI
    Show,

    /// Write a configuration file with default values if none exists
    Init,
}

/// Run a config subcommand.
pub fn run(command: ConfigCommands, path: &std::path::Path) -> Result<(), CliError> {
    match command {
        ConfigCommands::Path => {
            println!("{}", path.display());
            Ok(())
        }
        ConfigCommands::Show => {
            let config = ConfigFile::load(path)?;
            config.to_ini().write_to(&mut io::stdout())?;
            Ok(())
        }
        ConfigCommands::Init => {
            if path.exists() {
                println!("Configuration file already exists: {}", path.display());
                return Ok(());
            }
            ConfigFile::default().save(path)?;
            println!("Configuration file: {}", path.display());
            println!();
            println!("Set manifest_url in the [content] section before running an update.");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_init_writes_defaults_once() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.ini");

        run(ConfigCommands::Init, &path).unwrap();
        assert!(path.exists());

        std::fs::write(&path, "[content]\nmanifest_url = http://cdn/m\n").unwrap();
        run(ConfigCommands::Init, &path).unwrap();
        let config = ConfigFile::load(&path).unwrap();
        assert_eq!(config.content.manifest_url, "http://cdn/m");
    }
}
