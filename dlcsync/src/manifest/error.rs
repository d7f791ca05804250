//! Manifest codec errors.

use thiserror::Error;

/// Errors decoding or encoding a manifest document.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// The document has no content at all.
    #[error("manifest is empty")]
    Empty,

    /// The document is not valid UTF-8.
    #[error("manifest is not valid UTF-8")]
    InvalidUtf8,

    /// The document is not a well-formed manifest.
    #[error("failed to parse manifest: {0}")]
    Decode(String),

    /// A package ID cannot be used as a package directory name.
    #[error("invalid package ID '{id}': {reason}")]
    InvalidPackageId { id: String, reason: &'static str },

    /// Two packages share an ID.
    #[error("duplicate package ID '{0}'")]
    DuplicatePackageId(String),

    /// The manifest could not be written out.
    #[error("failed to serialize manifest: {0}")]
    Encode(String),
}
