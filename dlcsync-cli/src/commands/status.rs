//! Status command - show what is installed locally.

use std::fs;

use console::style;
use dlcsync::layout::{INSTALLED_MARKER_KEY, MANIFEST_FILE, TEMP_MANIFEST_FILE};
use dlcsync::manifest::parse_manifest;
use dlcsync::{JsonFileStore, PersistentStore};

use super::format_size;
use crate::error::CliError;
use crate::runner::CliRunner;

/// Run the status command.
pub fn run(runner: &CliRunner) -> Result<(), CliError> {
    let config = runner.config();
    let storage = &config.storage;

    println!("Manifest URL: {}", display_or_unset(&config.content.manifest_url));
    println!("Bundle:       {}", storage.bundle_dir.display());
    println!("DLC cache:    {}", storage.dlc_dir.display());
    println!();

    let installed_before = JsonFileStore::open(&storage.store_file)
        .map(|store| store.has_value(INSTALLED_MARKER_KEY))
        .unwrap_or(false);

    let manifest_path = storage.dlc_dir.join(MANIFEST_FILE);
    match fs::read_to_string(&manifest_path) {
        Ok(text) => match parse_manifest(&text) {
            Ok(manifest) => {
                let total: u64 = manifest
                    .packages
                    .iter()
                    .map(|p| u64::from(p.size_bytes))
                    .sum();
                println!(
                    "Installed: {} package(s), {}",
                    manifest.packages.len(),
                    format_size(total)
                );
                for package in &manifest.packages {
                    println!("  {} ({} files)", package.id, package.files.len());
                }
            }
            Err(e) => println!("{} {}", style("Local manifest is unreadable:").red(), e),
        },
        Err(_) if installed_before => {
            println!(
                "{}",
                style("Installed content was purged; the next update is required.").yellow()
            );
        }
        Err(_) => println!("No content installed yet."),
    }

    if storage.dlc_dir.join(TEMP_MANIFEST_FILE).exists() {
        println!();
        println!("An interrupted download will be resumed by the next update.");
    }

    Ok(())
}

fn display_or_unset(value: &str) -> &str {
    if value.trim().is_empty() {
        "(not set)"
    } else {
        value
    }
}
