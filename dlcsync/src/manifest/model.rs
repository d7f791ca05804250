//! Typed manifest model.
//!
//! The diff and install logic only ever sees these types; the wire format
//! lives in [`super::xml`].

use semver::Version;

/// A single file shipped inside a package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Path relative to the content root, prefixed by the package ID
    /// (e.g. `PackageA/texture.png`).
    pub relative_path: String,

    /// Manifest checksum of the file.
    pub checksum: String,
}

impl FileEntry {
    /// Create a file entry.
    pub fn new(relative_path: impl Into<String>, checksum: impl Into<String>) -> Self {
        Self {
            relative_path: relative_path.into(),
            checksum: checksum.into(),
        }
    }
}

/// A downloadable content package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Package {
    /// Unique ID within a manifest. Also the package's directory name.
    pub id: String,

    /// Where the package archive is fetched from.
    pub url: String,

    /// Manifest checksum of the whole downloaded archive.
    pub checksum: String,

    /// Archive size in bytes, used for progress totals.
    pub size_bytes: u32,

    /// Minimum application version able to use this package, if declared.
    pub min_version: Option<String>,

    /// Files the package installs.
    pub files: Vec<FileEntry>,
}

impl Package {
    /// Create a package with no files.
    pub fn new(
        id: impl Into<String>,
        url: impl Into<String>,
        checksum: impl Into<String>,
        size_bytes: u32,
    ) -> Self {
        Self {
            id: id.into(),
            url: url.into(),
            checksum: checksum.into(),
            size_bytes,
            min_version: None,
            files: Vec::new(),
        }
    }

    /// Add a file entry.
    pub fn with_file(mut self, relative_path: impl Into<String>, checksum: impl Into<String>) -> Self {
        self.files.push(FileEntry::new(relative_path, checksum));
        self
    }

    /// Set the minimum application version.
    pub fn with_min_version(mut self, version: impl Into<String>) -> Self {
        self.min_version = Some(version.into());
        self
    }

    /// Whether this package needs a newer application than `app_version`.
    ///
    /// An unparsable `MinVersion` is ignored rather than locking the package out.
    pub fn requires_newer_app(&self, app_version: &Version) -> bool {
        self.min_version
            .as_deref()
            .and_then(|v| Version::parse(v.trim()).ok())
            .is_some_and(|min| min > *app_version)
    }
}

/// A content manifest, either fetched from the server or stored locally.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ManifestDocument {
    /// Server-controlled kill switch. When false no update is ever required.
    pub dlc_enabled: bool,

    /// Publication timestamp, if the server stamps its manifests.
    pub timestamp: Option<String>,

    /// Packages in manifest order.
    pub packages: Vec<Package>,
}

impl ManifestDocument {
    /// Create an enabled manifest with the given packages.
    pub fn new(packages: Vec<Package>) -> Self {
        Self {
            dlc_enabled: true,
            timestamp: None,
            packages,
        }
    }

    /// Find a package by ID.
    pub fn package(&self, id: &str) -> Option<&Package> {
        self.packages.iter().find(|p| p.id == id)
    }

    /// Copy of this manifest without its timestamp.
    ///
    /// Two publications of the same content differ only in timestamp, so
    /// comparisons of manifest snapshots go through this.
    pub fn without_timestamp(&self) -> Self {
        Self {
            timestamp: None,
            ..self.clone()
        }
    }
}
