//! Shared setup for commands that touch the pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::runtime::Runtime;
use tracing::info;

use dlcsync::config::{default_config_path, ConfigFile};
use dlcsync::logging::{init_logging, WorkerGuard};
use dlcsync::{ContentManagementSystem, HttpContentDownloader, JsonFileStore, LocalFileSystem};

use crate::error::CliError;

/// Loaded configuration, logging and runtime for one CLI invocation.
pub struct CliRunner {
    config: ConfigFile,
    config_path: PathBuf,
    runtime: Runtime,
    _log_guard: Option<WorkerGuard>,
}

/// Log filter for a `-v` count, or `None` to keep the configured level.
fn verbosity_filter(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("dlcsync=debug"),
        _ => Some("trace"),
    }
}

impl CliRunner {
    /// Load the config file and start logging and the runtime.
    pub fn new(config_path: Option<PathBuf>, verbose: u8) -> Result<Self, CliError> {
        let config_path = config_path.unwrap_or_else(default_config_path);
        let mut config = ConfigFile::load(&config_path)?;
        if let Some(level) = verbosity_filter(verbose) {
            config.logging.level = level.to_string();
        }

        let log_guard = init_logging(&config.logging)?;

        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .thread_name("dlcsync-io")
            .build()
            .map_err(|e| CliError::Runtime(e.to_string()))?;

        Ok(Self {
            config,
            config_path,
            runtime,
            _log_guard: log_guard,
        })
    }

    /// The loaded configuration.
    pub fn config(&self) -> &ConfigFile {
        &self.config
    }

    /// Runtime for driving async pipeline phases.
    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    /// Log a startup line for `command`.
    pub fn log_startup(&self, command: &str) {
        info!(
            command,
            version = env!("CARGO_PKG_VERSION"),
            config = %self.config_path.display(),
            "dlcsync starting"
        );
    }

    /// Assemble the content management system from the configuration.
    pub fn build_system(&self) -> Result<ContentManagementSystem, CliError> {
        let content = &self.config.content;
        if content.manifest_url.trim().is_empty() {
            return Err(CliError::Config(format!(
                "No manifest URL configured. Set manifest_url in the [content] section of {}",
                self.config_path.display()
            )));
        }

        let storage = &self.config.storage;
        fs::create_dir_all(&storage.dlc_dir)?;
        create_parent(&storage.store_file)?;

        let fs = Arc::new(LocalFileSystem::new(&storage.bundle_dir, &storage.dlc_dir));
        let store = Arc::new(JsonFileStore::open(&storage.store_file)?);
        let downloader = Arc::new(HttpContentDownloader::from_config(content)?);

        Ok(ContentManagementSystem::new(
            fs,
            downloader,
            store,
            content.clone(),
        )?)
    }
}

fn create_parent(path: &Path) -> Result<(), CliError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verbosity_filter() {
        assert_eq!(verbosity_filter(0), None);
        assert_eq!(verbosity_filter(1), Some("dlcsync=debug"));
        assert_eq!(verbosity_filter(3), Some("trace"));
    }
}
