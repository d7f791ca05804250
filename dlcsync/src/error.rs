//! Error types for the content pipeline.

use std::io;

use crate::manifest::ManifestError;
use crate::storage::StorageLocation;

/// Result type for pipeline operations.
pub type CmsResult<T> = Result<T, CmsError>;

/// Errors that can occur while checking, downloading or installing content.
///
/// None of these escape the [`ContentManagementSystem`](crate::ContentManagementSystem)
/// phase operations; they are logged and folded into the public outcome enums.
#[derive(Debug)]
pub enum CmsError {
    /// Failed to read a file from a storage location.
    ReadFailed {
        location: StorageLocation,
        path: String,
        source: io::Error,
    },

    /// Failed to write a file to a storage location.
    WriteFailed {
        location: StorageLocation,
        path: String,
        source: io::Error,
    },

    /// Failed to create a directory.
    CreateDirFailed {
        location: StorageLocation,
        path: String,
        source: io::Error,
    },

    /// Failed to delete a file or directory.
    DeleteFailed {
        location: StorageLocation,
        path: String,
        source: io::Error,
    },

    /// The downloader refused to start a request.
    DownloadNotStarted { url: String, reason: String },

    /// A manifest or package transfer failed.
    DownloadFailed { url: String, reason: String },

    /// A downloaded archive does not match its declared checksum.
    ChecksumMismatch {
        package: String,
        expected: String,
        actual: String,
    },

    /// The manifest document could not be decoded or encoded.
    Manifest(ManifestError),

    /// Archive extraction failed.
    ExtractionFailed { package: String, reason: String },

    /// One or more parallel install tasks failed.
    InstallAborted { failures: Vec<String> },

    /// The persistent key-value store could not be updated.
    StoreFailed(String),

    /// The operation was called out of order or with nothing to do.
    NothingToInstall,

    /// Invalid configuration.
    InvalidConfig(String),
}

impl std::fmt::Display for CmsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ReadFailed {
                location,
                path,
                source,
            } => write!(f, "failed to read {}:{}: {}", location, path, source),
            Self::WriteFailed {
                location,
                path,
                source,
            } => write!(f, "failed to write {}:{}: {}", location, path, source),
            Self::CreateDirFailed {
                location,
                path,
                source,
            } => write!(
                f,
                "failed to create directory {}:{}: {}",
                location, path, source
            ),
            Self::DeleteFailed {
                location,
                path,
                source,
            } => write!(f, "failed to delete {}:{}: {}", location, path, source),
            Self::DownloadNotStarted { url, reason } => {
                write!(f, "could not start download of {}: {}", url, reason)
            }
            Self::DownloadFailed { url, reason } => {
                write!(f, "failed to download {}: {}", url, reason)
            }
            Self::ChecksumMismatch {
                package,
                expected,
                actual,
            } => write!(
                f,
                "checksum mismatch for package {}: expected {}, got {}",
                package, expected, actual
            ),
            Self::Manifest(e) => write!(f, "manifest error: {}", e),
            Self::ExtractionFailed { package, reason } => {
                write!(f, "failed to extract package {}: {}", package, reason)
            }
            Self::InstallAborted { failures } => {
                write!(
                    f,
                    "install aborted, {} task(s) failed: {}",
                    failures.len(),
                    failures.join("; ")
                )
            }
            Self::StoreFailed(msg) => write!(f, "persistent store error: {}", msg),
            Self::NothingToInstall => write!(f, "nothing to install"),
            Self::InvalidConfig(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for CmsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::ReadFailed { source, .. } => Some(source),
            Self::WriteFailed { source, .. } => Some(source),
            Self::CreateDirFailed { source, .. } => Some(source),
            Self::DeleteFailed { source, .. } => Some(source),
            Self::Manifest(e) => Some(e),
            _ => None,
        }
    }
}

impl From<ManifestError> for CmsError {
    fn from(e: ManifestError) -> Self {
        Self::Manifest(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_mismatch_display() {
        let err = CmsError::ChecksumMismatch {
            package: "PackageA".to_string(),
            expected: "AAA".to_string(),
            actual: "BBB".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("checksum mismatch"));
        assert!(msg.contains("PackageA"));
        assert!(msg.contains("AAA"));
        assert!(msg.contains("BBB"));
    }

    #[test]
    fn test_read_failed_has_source() {
        use std::error::Error;

        let err = CmsError::ReadFailed {
            location: StorageLocation::Dlc,
            path: "PackageA/a.png".to_string(),
            source: io::Error::new(io::ErrorKind::NotFound, "gone"),
        };
        assert!(err.source().is_some());
        assert!(err.to_string().contains("dlc:PackageA/a.png"));
    }

    #[test]
    fn test_install_aborted_lists_failures() {
        let err = CmsError::InstallAborted {
            failures: vec!["extract A".to_string(), "remove B".to_string()],
        };
        assert_eq!(
            err.to_string(),
            "install aborted, 2 task(s) failed: extract A; remove B"
        );
    }
}
