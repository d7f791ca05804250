//! Pipeline configuration.
//!
//! [`ContentConfig`] is what the library consumes. [`ConfigFile`] is the
//! on-disk INI form used by the command-line front end:
//!
//! ```ini
//! [content]
//! manifest_url = https://cdn.example.com/ContentManifest.moman
//! bundle_content_prefix = DLC/
//! checksum_algorithm = sha1
//! app_version = 1.4.0
//!
//! [storage]
//! bundle_dir = /opt/app/bundle
//! dlc_dir = ~/.local/share/dlcsync/dlc
//! store_file = ~/.local/share/dlcsync/store.json
//!
//! [download]
//! flush_threshold_bytes = 1048576
//! timeout_secs = 300
//!
//! [install]
//! workers = 4
//!
//! [logging]
//! level = info
//! file = /var/log/dlcsync.log
//! ```

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ini::Ini;
use semver::Version;
use thiserror::Error;

use crate::checksum::ChecksumAlgorithm;
use crate::download::{DEFAULT_FLUSH_THRESHOLD, DEFAULT_TIMEOUT_SECS};
use crate::install::DEFAULT_INSTALL_WORKERS;
use crate::logging::LoggingConfig;

/// Default directory inside the bundle that mirrors the DLC layout.
pub const DEFAULT_BUNDLE_CONTENT_PREFIX: &str = "DLC/";

/// Configuration for the content pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentConfig {
    /// Where the server manifest is fetched from.
    pub manifest_url: String,

    /// Directory inside the read-only bundle holding shipped content.
    pub bundle_content_prefix: String,

    /// Transport buffer budget before a chunk is flushed to disk.
    pub flush_threshold_bytes: usize,

    /// HTTP request timeout.
    pub request_timeout: Duration,

    /// Worker threads for parallel extraction and removal.
    pub install_workers: usize,

    /// Digest used for manifest checksums.
    pub checksum_algorithm: ChecksumAlgorithm,

    /// Running application version, for `MinVersion` gating.
    pub app_version: Option<Version>,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            manifest_url: String::new(),
            bundle_content_prefix: DEFAULT_BUNDLE_CONTENT_PREFIX.to_string(),
            flush_threshold_bytes: DEFAULT_FLUSH_THRESHOLD,
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            install_workers: DEFAULT_INSTALL_WORKERS,
            checksum_algorithm: ChecksumAlgorithm::default(),
            app_version: None,
        }
    }
}

impl ContentConfig {
    /// Create a configuration fetching the manifest from `manifest_url`.
    pub fn new(manifest_url: impl Into<String>) -> Self {
        Self {
            manifest_url: manifest_url.into(),
            ..Default::default()
        }
    }

    /// Set the bundle content prefix.
    pub fn with_bundle_content_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.bundle_content_prefix = prefix.into();
        self
    }

    /// Set the flush threshold.
    pub fn with_flush_threshold_bytes(mut self, bytes: usize) -> Self {
        self.flush_threshold_bytes = bytes.max(1);
        self
    }

    /// Set the HTTP timeout.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the install worker count. At least one worker is always used.
    pub fn with_install_workers(mut self, workers: usize) -> Self {
        self.install_workers = workers.max(1);
        self
    }

    /// Set the checksum algorithm.
    pub fn with_checksum_algorithm(mut self, algorithm: ChecksumAlgorithm) -> Self {
        self.checksum_algorithm = algorithm;
        self
    }

    /// Set the running application version.
    pub fn with_app_version(mut self, version: Version) -> Self {
        self.app_version = Some(version);
        self
    }
}

/// Errors loading or saving the configuration file.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to write config file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(String),

    #[error("invalid value for [{section}] {key} = '{value}': {reason}")]
    InvalidValue {
        section: &'static str,
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Where content lives on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageSettings {
    /// Root of the read-only application bundle.
    pub bundle_dir: PathBuf,

    /// Root of the writable DLC cache.
    pub dlc_dir: PathBuf,

    /// JSON file backing the persistent key-value store.
    pub store_file: PathBuf,
}

impl Default for StorageSettings {
    fn default() -> Self {
        let data = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("dlcsync");
        Self {
            bundle_dir: data.join("bundle"),
            dlc_dir: data.join("dlc"),
            store_file: data.join("store.json"),
        }
    }
}

/// The configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigFile {
    /// Pipeline settings.
    pub content: ContentConfig,

    /// Storage roots.
    pub storage: StorageSettings,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Default config file location (`<config dir>/dlcsync/config.ini`).
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("dlcsync")
        .join("config.ini")
}

/// Expand a leading `~/` to the home directory.
fn expand_home(value: &str) -> PathBuf {
    match (value.strip_prefix("~/"), dirs::home_dir()) {
        (Some(rest), Some(home)) => home.join(rest),
        _ => PathBuf::from(value),
    }
}

fn parse_value<T: std::str::FromStr>(
    section: &'static str,
    key: &'static str,
    value: &str,
) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            section,
            key,
            value: value.to_string(),
            reason: e.to_string(),
        })
}

impl ConfigFile {
    /// Load the config file at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(text) => Self::parse(&text),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read {
                path: path.to_path_buf(),
                source: e,
            }),
        }
    }

    /// Parse INI text. Keys that are absent keep their defaults.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        let ini = Ini::load_from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        let mut config = Self::default();

        let get = |section: &str, key: &str| -> Option<String> {
            ini.section(Some(section))
                .and_then(|s| s.get(key))
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };

        // [content]
        if let Some(v) = get("content", "manifest_url") {
            config.content.manifest_url = v;
        }
        if let Some(v) = get("content", "bundle_content_prefix") {
            config.content.bundle_content_prefix = v;
        }
        if let Some(v) = get("content", "checksum_algorithm") {
            config.content.checksum_algorithm = parse_value("content", "checksum_algorithm", &v)?;
        }
        if let Some(v) = get("content", "app_version") {
            config.content.app_version = Some(parse_value("content", "app_version", &v)?);
        }

        // [storage]
        if let Some(v) = get("storage", "bundle_dir") {
            config.storage.bundle_dir = expand_home(&v);
        }
        if let Some(v) = get("storage", "dlc_dir") {
            config.storage.dlc_dir = expand_home(&v);
        }
        if let Some(v) = get("storage", "store_file") {
            config.storage.store_file = expand_home(&v);
        }

        // [download]
        if let Some(v) = get("download", "flush_threshold_bytes") {
            let bytes: usize = parse_value("download", "flush_threshold_bytes", &v)?;
            if bytes == 0 {
                return Err(ConfigError::InvalidValue {
                    section: "download",
                    key: "flush_threshold_bytes",
                    value: v,
                    reason: "must be greater than zero".to_string(),
                });
            }
            config.content.flush_threshold_bytes = bytes;
        }
        if let Some(v) = get("download", "timeout_secs") {
            let secs: u64 = parse_value("download", "timeout_secs", &v)?;
            config.content.request_timeout = Duration::from_secs(secs);
        }

        // [install]
        if let Some(v) = get("install", "workers") {
            let workers: usize = parse_value("install", "workers", &v)?;
            config.content.install_workers = workers.max(1);
        }

        // [logging]
        if let Some(v) = get("logging", "level") {
            config.logging.level = v;
        }
        if let Some(v) = get("logging", "file") {
            config.logging.file = Some(expand_home(&v));
        }

        Ok(config)
    }

    /// Render as INI.
    pub fn to_ini(&self) -> Ini {
        let mut ini = Ini::new();

        let content = &self.content;
        ini.with_section(Some("content"))
            .set("manifest_url", content.manifest_url.as_str())
            .set("bundle_content_prefix", content.bundle_content_prefix.as_str())
            .set("checksum_algorithm", content.checksum_algorithm.to_string());
        if let Some(version) = &content.app_version {
            ini.with_section(Some("content"))
                .set("app_version", version.to_string());
        }

        ini.with_section(Some("storage"))
            .set("bundle_dir", self.storage.bundle_dir.to_string_lossy())
            .set("dlc_dir", self.storage.dlc_dir.to_string_lossy())
            .set("store_file", self.storage.store_file.to_string_lossy());

        ini.with_section(Some("download"))
            .set(
                "flush_threshold_bytes",
                content.flush_threshold_bytes.to_string(),
            )
            .set(
                "timeout_secs",
                content.request_timeout.as_secs().to_string(),
            );

        ini.with_section(Some("install"))
            .set("workers", content.install_workers.to_string());

        ini.with_section(Some("logging"))
            .set("level", self.logging.level.as_str());
        if let Some(file) = &self.logging.file {
            ini.with_section(Some("logging"))
                .set("file", file.to_string_lossy());
        }

        ini
    }

    /// Write the config file, creating its directory if needed.
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        let write_failed = |source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(write_failed)?;
        }
        self.to_ini().write_to_file(path).map_err(write_failed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = ContentConfig::default();
        assert!(config.manifest_url.is_empty());
        assert_eq!(config.bundle_content_prefix, "DLC/");
        assert_eq!(config.flush_threshold_bytes, 1024 * 1024);
        assert_eq!(config.install_workers, 4);
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Sha1);
        assert!(config.app_version.is_none());
    }

    #[test]
    fn test_builder_pattern() {
        let config = ContentConfig::new("https://cdn.example.com/manifest")
            .with_bundle_content_prefix("Content/")
            .with_flush_threshold_bytes(0)
            .with_request_timeout(Duration::from_secs(60))
            .with_install_workers(0)
            .with_checksum_algorithm(ChecksumAlgorithm::Sha256)
            .with_app_version(Version::new(2, 1, 0));

        assert_eq!(config.manifest_url, "https://cdn.example.com/manifest");
        assert_eq!(config.bundle_content_prefix, "Content/");
        assert_eq!(config.flush_threshold_bytes, 1);
        assert_eq!(config.request_timeout, Duration::from_secs(60));
        assert_eq!(config.install_workers, 1);
        assert_eq!(config.checksum_algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(config.app_version, Some(Version::new(2, 1, 0)));
    }

    #[test]
    fn test_parse_full_file() {
        let config = ConfigFile::parse(
            r#"
[content]
manifest_url = https://cdn.example.com/ContentManifest.moman
checksum_algorithm = sha256
app_version = 1.4.0

[storage]
bundle_dir = /opt/app/bundle
dlc_dir = /var/lib/app/dlc
store_file = /var/lib/app/store.json

[download]
flush_threshold_bytes = 4096
timeout_secs = 30

[install]
workers = 8

[logging]
level = debug
"#,
        )
        .unwrap();

        assert_eq!(
            config.content.manifest_url,
            "https://cdn.example.com/ContentManifest.moman"
        );
        assert_eq!(config.content.checksum_algorithm, ChecksumAlgorithm::Sha256);
        assert_eq!(config.content.app_version, Some(Version::new(1, 4, 0)));
        assert_eq!(config.storage.dlc_dir, PathBuf::from("/var/lib/app/dlc"));
        assert_eq!(config.content.flush_threshold_bytes, 4096);
        assert_eq!(config.content.request_timeout, Duration::from_secs(30));
        assert_eq!(config.content.install_workers, 8);
        assert_eq!(config.logging.level, "debug");
        // Unset keys keep defaults
        assert_eq!(config.content.bundle_content_prefix, "DLC/");
        assert!(config.logging.file.is_none());
    }

    #[test]
    fn test_invalid_values() {
        let err = ConfigFile::parse("[install]\nworkers = lots\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { key: "workers", .. }));

        let err = ConfigFile::parse("[content]\nchecksum_algorithm = md5\n").unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "checksum_algorithm",
                ..
            }
        ));

        let err = ConfigFile::parse("[download]\nflush_threshold_bytes = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let temp = TempDir::new().unwrap();
        let config = ConfigFile::load(&temp.path().join("absent.ini")).unwrap();
        assert_eq!(config, ConfigFile::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("nested/config.ini");

        let mut config = ConfigFile::default();
        config.content = ContentConfig::new("https://cdn.example.com/m")
            .with_app_version(Version::new(3, 0, 1))
            .with_install_workers(2);
        config.storage.bundle_dir = PathBuf::from("/bundle");
        config.logging = LoggingConfig::default().with_file("/tmp/dlcsync.log");
        config.save(&path).unwrap();

        assert_eq!(ConfigFile::load(&path).unwrap(), config);
    }

    #[test]
    fn test_default_path_ends_with_config_ini() {
        let path = default_config_path();
        assert!(path.ends_with("dlcsync/config.ini"));
    }
}
