//! CLI error type and exit codes.

use std::fmt;
use std::io;

use dlcsync::config::ConfigError;
use dlcsync::logging::LoggingError;
use dlcsync::CmsError;

/// Errors surfaced to the user by a CLI command.
#[derive(Debug)]
pub enum CliError {
    /// Missing or invalid settings.
    Config(String),

    /// The config file could not be read or written.
    ConfigFile(ConfigError),

    /// Logging could not be set up.
    Logging(LoggingError),

    /// Pipeline construction failed.
    Pipeline(CmsError),

    /// The update check failed. `blocking` means content is unusable until
    /// an update succeeds.
    CheckFailed { blocking: bool },

    /// Package downloads failed.
    DownloadFailed,

    /// Installing the downloaded packages failed.
    InstallFailed,

    /// Local I/O failed.
    Io(io::Error),

    /// The async runtime could not be started.
    Runtime(String),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Config(_) | CliError::ConfigFile(_) | CliError::Logging(_) => 2,
            CliError::CheckFailed { blocking: false } => 3,
            CliError::CheckFailed { blocking: true } => 4,
            CliError::DownloadFailed => 5,
            CliError::InstallFailed => 6,
            CliError::Pipeline(_) | CliError::Io(_) | CliError::Runtime(_) => 1,
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CliError::Config(msg) => write!(f, "Configuration error: {}", msg),
            CliError::ConfigFile(e) => write!(f, "{}", e),
            CliError::Logging(e) => write!(f, "Failed to initialize logging: {}", e),
            CliError::Pipeline(e) => write!(f, "{}", e),
            CliError::CheckFailed { blocking: false } => write!(f, "Update check failed"),
            CliError::CheckFailed { blocking: true } => write!(
                f,
                "Update check failed and installed content is missing; \
                 an update is required before content can be used"
            ),
            CliError::DownloadFailed => write!(f, "Downloading updates failed"),
            CliError::InstallFailed => write!(f, "Installing updates failed"),
            CliError::Io(e) => write!(f, "I/O error: {}", e),
            CliError::Runtime(msg) => write!(f, "Failed to start runtime: {}", msg),
        }
    }
}

impl std::error::Error for CliError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CliError::ConfigFile(e) => Some(e),
            CliError::Logging(e) => Some(e),
            CliError::Pipeline(e) => Some(e),
            CliError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ConfigError> for CliError {
    fn from(e: ConfigError) -> Self {
        CliError::ConfigFile(e)
    }
}

impl From<LoggingError> for CliError {
    fn from(e: LoggingError) -> Self {
        CliError::Logging(e)
    }
}

impl From<CmsError> for CliError {
    fn from(e: CmsError) -> Self {
        CliError::Pipeline(e)
    }
}

impl From<io::Error> for CliError {
    fn from(e: io::Error) -> Self {
        CliError::Io(e)
    }
}
