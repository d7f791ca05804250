//! Atomic content installer.
//!
//! Runs once every pending package archive is downloaded and verified:
//!
//! 1. Extract each archive over its package directory (in parallel)
//! 2. Delete the temp download directory
//! 3. Delete every stale package directory (in parallel)
//! 4. Write the server manifest as the new local manifest
//! 5. Record the installed marker in the persistent store
//!
//! Any failure in steps 1 or 3 aborts before the manifest is written, so the
//! old manifest keeps describing what is resident and the next check simply
//! recomputes the same work.

use std::collections::{BTreeSet, HashSet};
use std::io::{Cursor, Read};
use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::{CmsError, CmsResult};
use crate::layout::{archive_path, INSTALLED_MARKER_KEY, MANIFEST_FILE, TEMP_DIR};
use crate::manifest::{serialize_manifest, ManifestDocument, Package};
use crate::storage::{FileSystem, StorageLocation};
use crate::store::PersistentStore;

/// Default number of install worker threads.
pub const DEFAULT_INSTALL_WORKERS: usize = 4;

/// Summary of a completed install.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstallReport {
    /// Packages extracted.
    pub packages_installed: usize,
    /// Files written across all packages.
    pub files_extracted: usize,
    /// Stale package directories removed.
    pub stale_removed: usize,
}

/// Extracts package archives and commits the new manifest.
pub struct AtomicInstaller {
    fs: Arc<dyn FileSystem>,
    store: Arc<dyn PersistentStore>,
    pool: ThreadPool,
}

impl std::fmt::Debug for AtomicInstaller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AtomicInstaller")
            .field("workers", &self.pool.current_num_threads())
            .finish()
    }
}

impl AtomicInstaller {
    /// Create an installer with a dedicated pool of `workers` threads.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        store: Arc<dyn PersistentStore>,
        workers: usize,
    ) -> CmsResult<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("dlcsync-install-{}", i))
            .build()
            .map_err(|e| CmsError::InvalidConfig(format!("failed to build install pool: {}", e)))?;

        Ok(Self { fs, store, pool })
    }

    /// Number of worker threads.
    pub fn workers(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Install `packages`, remove `stale` packages and commit `manifest`.
    ///
    /// Blocks until every parallel task has finished.
    ///
    /// # Errors
    ///
    /// - [`CmsError::NothingToInstall`] if there is nothing to extract or remove
    /// - [`CmsError::InstallAborted`] if any extraction or removal failed
    /// - Storage or manifest errors from the final commit
    pub fn install(
        &self,
        packages: &[Package],
        stale: &BTreeSet<String>,
        manifest: &ManifestDocument,
    ) -> CmsResult<InstallReport> {
        if packages.is_empty() && stale.is_empty() {
            return Err(CmsError::NothingToInstall);
        }

        let mut report = InstallReport::default();

        if !packages.is_empty() {
            info!(packages = packages.len(), "Extracting packages");
            let results: Vec<(String, CmsResult<usize>)> = self.pool.install(|| {
                packages
                    .par_iter()
                    .map(|p| (p.id.clone(), self.extract(p)))
                    .collect()
            });
            report.files_extracted = abort_on_failure(results)?.into_iter().sum();
            report.packages_installed = packages.len();
        }

        if let Err(e) = self.fs.delete_directory(StorageLocation::Dlc, TEMP_DIR) {
            warn!(error = %e, "Failed to remove temporary download directory");
        }

        if !stale.is_empty() {
            info!(stale = stale.len(), "Removing stale packages");
            let results: Vec<(String, CmsResult<()>)> = self.pool.install(|| {
                stale
                    .par_iter()
                    .map(|id| (id.clone(), self.remove(id)))
                    .collect()
            });
            report.stale_removed = abort_on_failure(results)?.len();
        }

        self.commit(manifest)?;

        info!(
            packages = report.packages_installed,
            files = report.files_extracted,
            stale = report.stale_removed,
            "Install complete"
        );
        Ok(report)
    }

    /// Extract one package archive over its package directory.
    ///
    /// Returns the number of files written.
    fn extract(&self, package: &Package) -> CmsResult<usize> {
        let archive = archive_path(&package.id);
        let extraction_failed = |reason: String| CmsError::ExtractionFailed {
            package: package.id.clone(),
            reason,
        };

        let mut bytes = Vec::new();
        self.fs
            .open_read(StorageLocation::Dlc, &archive)
            .and_then(|mut reader| reader.read_to_end(&mut bytes))
            .map_err(|e| CmsError::ReadFailed {
                location: StorageLocation::Dlc,
                path: archive.clone(),
                source: e,
            })?;

        let mut zip =
            ZipArchive::new(Cursor::new(bytes)).map_err(|e| extraction_failed(e.to_string()))?;

        // Replace, never merge: files from an older layout must not survive
        self.fs
            .delete_directory(StorageLocation::Dlc, &package.id)
            .map_err(|e| CmsError::DeleteFailed {
                location: StorageLocation::Dlc,
                path: package.id.clone(),
                source: e,
            })?;

        let mut created_dirs = HashSet::new();
        let mut files = 0;

        for index in 0..zip.len() {
            let mut entry = zip
                .by_index(index)
                .map_err(|e| extraction_failed(e.to_string()))?;

            let relative = entry
                .enclosed_name()
                .map(|p| p.to_string_lossy().replace('\\', "/"))
                .ok_or_else(|| extraction_failed(format!("unsafe entry name: {}", entry.name())))?;

            // Packages extract in parallel, each confined to its own directory
            let owner = relative.split('/').next().unwrap_or_default();
            if owner != package.id {
                return Err(extraction_failed(format!(
                    "entry {} is outside the package directory",
                    relative
                )));
            }

            if entry.is_dir() {
                self.create_dir(&relative, &mut created_dirs)?;
                continue;
            }

            if let Some((parent, _)) = relative.rsplit_once('/') {
                self.create_dir(parent, &mut created_dirs)?;
            }

            let mut data = Vec::with_capacity(entry.size() as usize);
            entry
                .read_to_end(&mut data)
                .map_err(|e| extraction_failed(format!("{}: {}", relative, e)))?;

            self.fs
                .write_file(StorageLocation::Dlc, &relative, &data)
                .map_err(|e| CmsError::WriteFailed {
                    location: StorageLocation::Dlc,
                    path: relative.clone(),
                    source: e,
                })?;
            files += 1;
        }

        debug!(package = %package.id, files, "Package extracted");
        Ok(files)
    }

    fn create_dir(&self, path: &str, created: &mut HashSet<String>) -> CmsResult<()> {
        if path.is_empty() || !created.insert(path.to_string()) {
            return Ok(());
        }
        self.fs
            .create_directory(StorageLocation::Dlc, path)
            .map_err(|e| CmsError::CreateDirFailed {
                location: StorageLocation::Dlc,
                path: path.to_string(),
                source: e,
            })
    }

    fn remove(&self, package_id: &str) -> CmsResult<()> {
        self.fs
            .delete_directory(StorageLocation::Dlc, package_id)
            .map_err(|e| CmsError::DeleteFailed {
                location: StorageLocation::Dlc,
                path: package_id.to_string(),
                source: e,
            })?;
        debug!(package = package_id, "Stale package removed");
        Ok(())
    }

    fn commit(&self, manifest: &ManifestDocument) -> CmsResult<()> {
        let xml = serialize_manifest(manifest)?;
        self.fs
            .write_file(StorageLocation::Dlc, MANIFEST_FILE, xml.as_bytes())
            .map_err(|e| CmsError::WriteFailed {
                location: StorageLocation::Dlc,
                path: MANIFEST_FILE.to_string(),
                source: e,
            })?;

        // The content is resident at this point; losing the marker only
        // weakens purge detection on the next launch.
        if let Err(e) = self.store.set_value(INSTALLED_MARKER_KEY, "true") {
            warn!(error = %e, "Failed to record installed marker");
        }
        Ok(())
    }
}

/// Collect successful task outputs, or fail with every task error.
fn abort_on_failure<T>(results: Vec<(String, CmsResult<T>)>) -> CmsResult<Vec<T>> {
    let mut values = Vec::with_capacity(results.len());
    let mut failures = Vec::new();

    for (id, result) in results {
        match result {
            Ok(value) => values.push(value),
            Err(e) => {
                warn!(package = %id, error = %e, "Install task failed");
                failures.push(format!("{}: {}", id, e));
            }
        }
    }

    if failures.is_empty() {
        Ok(values)
    } else {
        Err(CmsError::InstallAborted { failures })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::parse_manifest;
    use crate::storage::LocalFileSystem;
    use crate::store::MemoryStore;
    use std::fs;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    struct Fixture {
        _bundle: TempDir,
        dlc: TempDir,
        store: Arc<MemoryStore>,
        installer: AtomicInstaller,
    }

    fn fixture() -> Fixture {
        let bundle = TempDir::new().unwrap();
        let dlc = TempDir::new().unwrap();
        let fs: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(bundle.path(), dlc.path()));
        let store = Arc::new(MemoryStore::new());
        let installer = AtomicInstaller::new(fs, store.clone(), 2).unwrap();
        Fixture {
            _bundle: bundle,
            dlc,
            store,
            installer,
        }
    }

    fn zip_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, data) in entries {
            if name.ends_with('/') {
                writer
                    .add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                writer.start_file(*name, SimpleFileOptions::default()).unwrap();
                writer.write_all(data).unwrap();
            }
        }
        writer.finish().unwrap().into_inner()
    }

    fn stage_archive(fx: &Fixture, id: &str, entries: &[(&str, &[u8])]) {
        let dir = fx.dlc.path().join(TEMP_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(format!("{}.packzip", id)), zip_bytes(entries)).unwrap();
    }

    fn manifest(ids: &[&str]) -> ManifestDocument {
        ManifestDocument::new(ids.iter().map(|id| Package::new(*id, "u", "c", 1)).collect())
    }

    #[test]
    fn test_install_extracts_and_commits() {
        let fx = fixture();
        stage_archive(
            &fx,
            "PackageA",
            &[
                ("PackageA/", b""),
                ("PackageA/a.txt", b"alpha"),
                ("PackageA/nested/deep/b.txt", b"beta"),
            ],
        );

        let packages = vec![Package::new("PackageA", "u", "c", 1)];
        let report = fx
            .installer
            .install(&packages, &BTreeSet::new(), &manifest(&["PackageA"]))
            .unwrap();

        assert_eq!(report.packages_installed, 1);
        assert_eq!(report.files_extracted, 2);
        assert_eq!(
            fs::read(fx.dlc.path().join("PackageA/nested/deep/b.txt")).unwrap(),
            b"beta"
        );
        // Temp directory is gone, manifest and marker are written
        assert!(!fx.dlc.path().join(TEMP_DIR).exists());
        let committed = fs::read_to_string(fx.dlc.path().join(MANIFEST_FILE)).unwrap();
        assert_eq!(parse_manifest(&committed).unwrap(), manifest(&["PackageA"]));
        assert!(fx.store.has_value(INSTALLED_MARKER_KEY));
    }

    #[test]
    fn test_install_replaces_old_package_files() {
        let fx = fixture();
        fs::create_dir_all(fx.dlc.path().join("PackageA")).unwrap();
        fs::write(fx.dlc.path().join("PackageA/old.txt"), b"old layout").unwrap();
        stage_archive(&fx, "PackageA", &[("PackageA/new.txt", b"new")]);

        fx.installer
            .install(
                &[Package::new("PackageA", "u", "c", 1)],
                &BTreeSet::new(),
                &manifest(&["PackageA"]),
            )
            .unwrap();

        assert!(!fx.dlc.path().join("PackageA/old.txt").exists());
        assert!(fx.dlc.path().join("PackageA/new.txt").exists());
    }

    #[test]
    fn test_stale_only_install() {
        let fx = fixture();
        fs::create_dir_all(fx.dlc.path().join("PackageB/sub")).unwrap();
        fs::write(fx.dlc.path().join("PackageB/sub/b.txt"), b"b").unwrap();

        let stale = BTreeSet::from(["PackageB".to_string()]);
        let report = fx.installer.install(&[], &stale, &manifest(&[])).unwrap();

        assert_eq!(report.stale_removed, 1);
        assert!(!fx.dlc.path().join("PackageB").exists());
        assert!(fx.dlc.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_nothing_to_install() {
        let fx = fixture();
        let err = fx
            .installer
            .install(&[], &BTreeSet::new(), &manifest(&[]))
            .unwrap_err();

        assert!(matches!(err, CmsError::NothingToInstall));
        assert!(!fx.dlc.path().join(MANIFEST_FILE).exists());
        assert!(!fx.store.has_value(INSTALLED_MARKER_KEY));
    }

    #[test]
    fn test_missing_archive_aborts_before_commit() {
        let fx = fixture();
        stage_archive(&fx, "PackageA", &[("PackageA/a.txt", b"alpha")]);
        fs::write(fx.dlc.path().join(MANIFEST_FILE), b"previous").unwrap();

        let packages = vec![
            Package::new("PackageA", "u", "c", 1),
            Package::new("PackageMissing", "u", "c", 1),
        ];
        let err = fx
            .installer
            .install(&packages, &BTreeSet::new(), &manifest(&["PackageA", "PackageMissing"]))
            .unwrap_err();

        match err {
            CmsError::InstallAborted { failures } => {
                assert_eq!(failures.len(), 1);
                assert!(failures[0].starts_with("PackageMissing"));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(fs::read(fx.dlc.path().join(MANIFEST_FILE)).unwrap(), b"previous");
        // Verified archives stay available for the next attempt
        assert!(fx.dlc.path().join(TEMP_DIR).join("PackageA.packzip").exists());
        assert!(!fx.store.has_value(INSTALLED_MARKER_KEY));
    }

    #[test]
    fn test_corrupt_archive_aborts() {
        let fx = fixture();
        let dir = fx.dlc.path().join(TEMP_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("PackageA.packzip"), b"definitely not a zip").unwrap();

        let err = fx
            .installer
            .install(
                &[Package::new("PackageA", "u", "c", 1)],
                &BTreeSet::new(),
                &manifest(&["PackageA"]),
            )
            .unwrap_err();
        assert!(matches!(err, CmsError::InstallAborted { .. }));
        assert!(!fx.dlc.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_entry_outside_package_directory_aborts() {
        let fx = fixture();
        fs::create_dir_all(fx.dlc.path().join("PackageB")).unwrap();
        fs::write(fx.dlc.path().join("PackageB/b.txt"), b"original").unwrap();
        fs::write(fx.dlc.path().join(MANIFEST_FILE), b"previous").unwrap();
        stage_archive(
            &fx,
            "PackageA",
            &[("PackageA/a.txt", b"alpha"), ("PackageB/b.txt", b"overwritten")],
        );

        let err = fx
            .installer
            .install(
                &[Package::new("PackageA", "u", "c", 1)],
                &BTreeSet::new(),
                &manifest(&["PackageA", "PackageB"]),
            )
            .unwrap_err();

        assert!(matches!(err, CmsError::InstallAborted { .. }));
        assert_eq!(
            fs::read(fx.dlc.path().join("PackageB/b.txt")).unwrap(),
            b"original"
        );
        assert_eq!(
            fs::read(fx.dlc.path().join(MANIFEST_FILE)).unwrap(),
            b"previous"
        );
    }

    #[test]
    fn test_root_level_entry_aborts() {
        let fx = fixture();
        stage_archive(&fx, "PackageA", &[(MANIFEST_FILE, b"<Manifest/>")]);

        let result = fx.installer.install(
            &[Package::new("PackageA", "u", "c", 1)],
            &BTreeSet::new(),
            &manifest(&["PackageA"]),
        );

        assert!(matches!(result, Err(CmsError::InstallAborted { .. })));
        assert!(!fx.dlc.path().join(MANIFEST_FILE).exists());
    }

    #[test]
    fn test_parallel_extraction_of_many_packages() {
        let fx = fixture();
        let ids: Vec<String> = (0..8).map(|i| format!("Package{}", i)).collect();
        for id in &ids {
            let file = format!("{}/data.bin", id);
            stage_archive(&fx, id, &[(file.as_str(), id.as_bytes())]);
        }

        let packages: Vec<Package> = ids.iter().map(|id| Package::new(id, "u", "c", 1)).collect();
        let names: Vec<&str> = ids.iter().map(String::as_str).collect();
        let report = fx
            .installer
            .install(&packages, &BTreeSet::new(), &manifest(&names))
            .unwrap();

        assert_eq!(report.files_extracted, 8);
        for id in &ids {
            assert_eq!(
                fs::read(fx.dlc.path().join(id).join("data.bin")).unwrap(),
                id.as_bytes()
            );
        }
    }

    #[test]
    fn test_worker_count_minimum() {
        let bundle = TempDir::new().unwrap();
        let dlc = TempDir::new().unwrap();
        let installer = AtomicInstaller::new(
            Arc::new(LocalFileSystem::new(bundle.path(), dlc.path())),
            Arc::new(MemoryStore::new()),
            0,
        )
        .unwrap();
        assert_eq!(installer.workers(), 1);
    }
}
