//! Manifest diffing.
//!
//! Compares the locally committed manifest against a freshly fetched server
//! manifest and decides which packages must be downloaded and which installed
//! packages are stale. Content that already ships byte-identical in the
//! read-only bundle is never scheduled for download.

use std::collections::{BTreeSet, HashMap};

use semver::Version;
use tracing::{debug, trace};

use crate::checksum::ChecksumService;
use crate::manifest::{ManifestDocument, Package};
use crate::storage::{FileSystem, StorageLocation};

/// Questions the diff asks about content already on the device.
pub trait ContentProbe {
    /// Whether `path` ships in the bundle with the given checksum.
    fn in_bundle(&self, path: &str, checksum: &str) -> bool;

    /// Whether `path` is in the DLC cache with the given checksum.
    fn in_dlc_cache(&self, path: &str, checksum: &str) -> bool;

    /// Remove a DLC cache copy of a file that the bundle already provides.
    fn evict_cached_copy(&self, path: &str);
}

/// [`ContentProbe`] backed by the file-system collaborator.
pub struct StorageProbe<'a> {
    fs: &'a dyn FileSystem,
    checksums: &'a ChecksumService,
    bundle_prefix: &'a str,
}

impl<'a> StorageProbe<'a> {
    /// Create a probe. `bundle_prefix` is the directory inside the bundle
    /// that mirrors the DLC content layout (e.g. `"DLC/"`).
    pub fn new(
        fs: &'a dyn FileSystem,
        checksums: &'a ChecksumService,
        bundle_prefix: &'a str,
    ) -> Self {
        Self {
            fs,
            checksums,
            bundle_prefix,
        }
    }

    fn bundle_path(&self, path: &str) -> String {
        let prefix = self.bundle_prefix.trim_end_matches('/');
        let path = path.trim_start_matches('/');
        if prefix.is_empty() {
            path.to_string()
        } else {
            format!("{}/{}", prefix, path)
        }
    }
}

impl ContentProbe for StorageProbe<'_> {
    fn in_bundle(&self, path: &str, checksum: &str) -> bool {
        self.checksums
            .matches(StorageLocation::Package, &self.bundle_path(path), checksum)
    }

    fn in_dlc_cache(&self, path: &str, checksum: &str) -> bool {
        self.checksums.matches(StorageLocation::Dlc, path, checksum)
    }

    fn evict_cached_copy(&self, path: &str) {
        if let Err(e) = self.fs.delete_file(StorageLocation::Dlc, path) {
            debug!(path, error = %e, "Could not remove DLC copy shadowed by bundle");
        }
    }
}

/// Work found by a diff.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContentDiff {
    /// Packages to download, in server manifest order.
    pub pending: Vec<Package>,
    /// IDs of installed packages the server no longer lists.
    pub stale: BTreeSet<String>,
    /// Sum of the pending packages' declared sizes.
    pub bytes_to_download: u32,
}

impl ContentDiff {
    /// Whether anything needs downloading or removing.
    pub fn requires_update(&self) -> bool {
        !self.pending.is_empty() || !self.stale.is_empty()
    }

    fn schedule(&mut self, package: &Package) {
        self.bytes_to_download = self.bytes_to_download.saturating_add(package.size_bytes);
        self.pending.push(package.clone());
    }
}

/// Result of comparing manifests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiffOutcome {
    /// The server has switched DLC off; nothing is ever required.
    Disabled,
    /// The comparison ran; the diff may be empty.
    Compared(ContentDiff),
}

/// Manifest diff engine.
#[derive(Debug, Clone, Default)]
pub struct ManifestDiff {
    app_version: Option<Version>,
}

impl ManifestDiff {
    /// Create a diff engine with no application version gating.
    pub fn new() -> Self {
        Self::default()
    }

    /// Ignore packages whose `MinVersion` is newer than `version`.
    pub fn with_app_version(mut self, version: Option<Version>) -> Self {
        self.app_version = version;
        self
    }

    fn is_gated(&self, package: &Package) -> bool {
        self.app_version
            .as_ref()
            .is_some_and(|app| package.requires_newer_app(app))
    }

    /// Compare the local manifest (if any) with the server manifest.
    pub fn compute(
        &self,
        local: Option<&ManifestDocument>,
        server: &ManifestDocument,
        probe: &dyn ContentProbe,
    ) -> DiffOutcome {
        if !server.dlc_enabled {
            debug!("Server manifest has DLC disabled");
            return DiffOutcome::Disabled;
        }

        let mut diff = ContentDiff::default();

        let Some(local) = local else {
            // Nothing to diff against: everything not in the bundle is needed
            for package in server.packages.iter().filter(|p| !self.is_gated(p)) {
                schedule_unless_bundled(&mut diff, package, probe);
            }
            return DiffOutcome::Compared(diff);
        };

        let mut local_checksums: HashMap<&str, &str> = HashMap::new();
        for package in &local.packages {
            local_checksums
                .entry(package.id.as_str())
                .or_insert(package.checksum.as_str());
        }

        for package in &server.packages {
            let local_checksum = local_checksums.remove(package.id.as_str());

            if self.is_gated(package) {
                debug!(package = %package.id, "Skipping package gated by MinVersion");
                continue;
            }

            match local_checksum {
                None => {
                    trace!(package = %package.id, "Package not installed");
                    schedule_unless_bundled(&mut diff, package, probe);
                }
                Some(checksum) if checksum != package.checksum => {
                    trace!(package = %package.id, "Package checksum changed");
                    schedule_unless_bundled(&mut diff, package, probe);
                }
                Some(_) => {
                    // Same archive on record, but the files on disk may have been altered
                    let corrupt = package
                        .files
                        .iter()
                        .find(|f| !probe.in_dlc_cache(&f.relative_path, &f.checksum));
                    if let Some(file) = corrupt {
                        debug!(
                            package = %package.id,
                            file = %file.relative_path,
                            "Installed file missing or corrupt"
                        );
                        schedule_unless_bundled(&mut diff, package, probe);
                    }
                }
            }
        }

        diff.stale = local_checksums
            .into_keys()
            .map(str::to_string)
            .collect();

        DiffOutcome::Compared(diff)
    }
}

/// Schedule `package` for download unless every file ships in the bundle.
///
/// Files the bundle provides have any DLC cache copy removed. The first file
/// missing from the bundle schedules the whole package and stops the walk.
fn schedule_unless_bundled(diff: &mut ContentDiff, package: &Package, probe: &dyn ContentProbe) {
    for file in &package.files {
        if !probe.in_bundle(&file.relative_path, &file.checksum) {
            debug!(package = %package.id, file = %file.relative_path, "Package requires download");
            diff.schedule(package);
            return;
        }
        probe.evict_cached_copy(&file.relative_path);
    }
}
