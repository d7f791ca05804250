//! The content management facade.
//!
//! [`ContentManagementSystem`] owns the three phase operations and all state
//! that lives across them. A cycle is:
//!
//! ```text
//! check_for_updates ──► download_updates ──► install_updates
//!   fetch manifest        one package at a      extract, remove stale,
//!   diff against local    time into _Temp-CMS   commit manifest
//! ```
//!
//! Cycle state is cleared at the start of every check and discarded at the
//! end of every install, so calling the phases out of order yields a failed
//! or empty result rather than acting on stale data.

use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::io::Read;
use std::sync::Arc;

use tracing::{debug, error, info, warn};

use crate::checksum::ChecksumService;
use crate::config::ContentConfig;
use crate::diff::{DiffOutcome, ManifestDiff, StorageProbe};
use crate::download::{
    collect, ContentDownloader, DownloadProgress, DownloadProgressCallback,
    PackageDownloadOrchestrator,
};
use crate::error::{CmsError, CmsResult};
use crate::install::{AtomicInstaller, InstallReport};
use crate::layout::{
    archive_path, package_id_from_archive, ARCHIVE_EXTENSION, DOWNLOADED_MANIFEST_FILE,
    INSTALLED_MARKER_KEY, MANIFEST_FILE, TEMP_DIR, TEMP_MANIFEST_FILE,
};
use crate::manifest::{parse_manifest_bytes, serialize_manifest, ManifestDocument, Package};
use crate::storage::{FileSystem, StorageLocation};
use crate::store::PersistentStore;

/// Outcome of an update check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateResult {
    /// Content is current.
    NotAvailable,
    /// Updates exist and are optional.
    Available,
    /// Updates exist and the app has less content than it shipped with.
    AvailableBlocking,
    /// The manifest could not be fetched or parsed.
    CheckFailed,
    /// The check failed and the content cache has been purged.
    CheckFailedBlocking,
}

impl UpdateResult {
    /// Whether the caller must complete the update before using content.
    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::AvailableBlocking | Self::CheckFailedBlocking)
    }

    /// Whether there is work to download or remove.
    pub fn is_available(&self) -> bool {
        matches!(self, Self::Available | Self::AvailableBlocking)
    }

    /// Whether the check itself failed.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::CheckFailed | Self::CheckFailedBlocking)
    }
}

impl fmt::Display for UpdateResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotAvailable => "no update available",
            Self::Available => "update available",
            Self::AvailableBlocking => "update required",
            Self::CheckFailed => "update check failed",
            Self::CheckFailedBlocking => "update check failed (update required)",
        };
        f.write_str(text)
    }
}

/// Outcome of the download and install phases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseResult {
    Succeeded,
    Failed,
}

impl PhaseResult {
    /// Whether the phase succeeded.
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Where the facade is within an update cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Idle,
    Checking,
    Checked { has_work: bool },
    CheckFailed,
    Downloading,
    Downloaded,
    DownloadFailed,
    Installing,
    Installed,
    InstallFailed,
}

/// State for one check/download/install cycle.
#[derive(Debug, Default)]
struct UpdateCycle {
    server_manifest: Option<ManifestDocument>,
    pending: Vec<Package>,
    stale: BTreeSet<String>,
    /// Pending packages whose archive survived an interrupted earlier cycle.
    cached: HashSet<String>,
    downloaded: bool,
}

/// Checks for, downloads and installs content updates.
///
/// Not internally synchronized: the phase operations take `&mut self`.
pub struct ContentManagementSystem {
    fs: Arc<dyn FileSystem>,
    downloader: Arc<dyn ContentDownloader>,
    store: Arc<dyn PersistentStore>,
    config: ContentConfig,
    checksums: ChecksumService,
    diff: ManifestDiff,
    installer: AtomicInstaller,
    progress: Arc<DownloadProgress>,
    cycle: UpdateCycle,
    cache_purged: bool,
    phase: CyclePhase,
}

impl fmt::Debug for ContentManagementSystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContentManagementSystem")
            .field("config", &self.config)
            .field("phase", &self.phase)
            .field("cache_purged", &self.cache_purged)
            .field("pending", &self.cycle.pending.len())
            .field("stale", &self.cycle.stale.len())
            .finish()
    }
}

impl ContentManagementSystem {
    /// Create the facade over its collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::InvalidConfig`] if the install worker pool cannot
    /// be created.
    pub fn new(
        fs: Arc<dyn FileSystem>,
        downloader: Arc<dyn ContentDownloader>,
        store: Arc<dyn PersistentStore>,
        config: ContentConfig,
    ) -> CmsResult<Self> {
        let checksums = ChecksumService::new(Arc::clone(&fs), config.checksum_algorithm);
        let diff = ManifestDiff::new().with_app_version(config.app_version.clone());
        let installer =
            AtomicInstaller::new(Arc::clone(&fs), Arc::clone(&store), config.install_workers)?;

        Ok(Self {
            fs,
            downloader,
            store,
            config,
            checksums,
            diff,
            installer,
            progress: Arc::new(DownloadProgress::new()),
            cycle: UpdateCycle::default(),
            cache_purged: false,
            phase: CyclePhase::Idle,
        })
    }

    /// Pipeline configuration.
    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    /// Current cycle phase.
    pub fn phase(&self) -> CyclePhase {
        self.phase
    }

    /// Whether the last check found the content cache purged.
    pub fn is_cache_purged(&self) -> bool {
        self.cache_purged
    }

    /// Whether content has been installed at least once on this device.
    pub fn has_installed_content(&self) -> bool {
        self.store.has_value(INSTALLED_MARKER_KEY)
    }

    /// Packages the last check scheduled for download.
    pub fn pending_packages(&self) -> &[Package] {
        &self.cycle.pending
    }

    /// Installed packages the last check found stale.
    pub fn stale_packages(&self) -> &BTreeSet<String> {
        &self.cycle.stale
    }

    /// Bytes the current cycle needs to download.
    pub fn running_total_to_download(&self) -> u32 {
        self.progress.to_download()
    }

    /// Bytes of fully downloaded packages in the current cycle.
    pub fn running_total_downloaded(&self) -> u32 {
        self.progress.downloaded()
    }

    /// Shared progress counters, readable while a download is in flight.
    pub fn progress(&self) -> Arc<DownloadProgress> {
        Arc::clone(&self.progress)
    }

    /// Checksum of a DLC cache file, exactly as manifests expect it.
    pub fn manifest_checksum_for_file(&self, path: &str) -> String {
        self.checksums.checksum(StorageLocation::Dlc, path)
    }

    /// Discard all cycle state.
    pub fn clear_download_data(&mut self) {
        self.cycle = UpdateCycle::default();
        self.progress.reset();
    }

    /// Read the committed local manifest, if there is one.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest exists but cannot be read or parsed.
    pub fn local_manifest(&self) -> CmsResult<Option<ManifestDocument>> {
        if !self.fs.exists(StorageLocation::Dlc, MANIFEST_FILE) {
            return Ok(None);
        }

        let mut bytes = Vec::new();
        self.fs
            .open_read(StorageLocation::Dlc, MANIFEST_FILE)
            .and_then(|mut reader| reader.read_to_end(&mut bytes))
            .map_err(|e| CmsError::ReadFailed {
                location: StorageLocation::Dlc,
                path: MANIFEST_FILE.to_string(),
                source: e,
            })?;

        Ok(Some(parse_manifest_bytes(&bytes)?))
    }

    /// Load the local manifest for a check, updating the purge flag.
    ///
    /// A missing manifest while the installed marker is set means the cache
    /// was wiped from outside. An unreadable manifest is treated as absent.
    fn load_local_manifest(&mut self) -> Option<ManifestDocument> {
        let exists = self.fs.exists(StorageLocation::Dlc, MANIFEST_FILE);
        self.cache_purged = !exists && self.has_installed_content();
        if self.cache_purged {
            warn!("Local manifest missing but content was installed before, cache was purged");
        }

        match self.local_manifest() {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable local manifest");
                None
            }
        }
    }

    async fn fetch_server_manifest(&self) -> CmsResult<ManifestDocument> {
        let stream = self.downloader.download_manifest()?;
        let bytes = collect(stream, &self.config.manifest_url).await?;
        Ok(parse_manifest_bytes(&bytes)?)
    }

    /// Fetch the server manifest and work out what needs to change.
    pub async fn check_for_updates(&mut self) -> UpdateResult {
        self.clear_download_data();
        self.phase = CyclePhase::Checking;

        let local = self.load_local_manifest();

        let server = match self.fetch_server_manifest().await {
            Ok(server) => server,
            Err(e) => {
                error!(error = %e, "Update check failed");
                self.phase = CyclePhase::CheckFailed;
                return if self.cache_purged {
                    UpdateResult::CheckFailedBlocking
                } else {
                    UpdateResult::CheckFailed
                };
            }
        };

        let probe = StorageProbe::new(
            &*self.fs,
            &self.checksums,
            &self.config.bundle_content_prefix,
        );
        let diff = match self.diff.compute(local.as_ref(), &server, &probe) {
            DiffOutcome::Disabled => {
                info!("Content updates disabled by server");
                self.phase = CyclePhase::Checked { has_work: false };
                return UpdateResult::NotAvailable;
            }
            DiffOutcome::Compared(diff) => diff,
        };

        if !diff.requires_update() {
            info!("Content is up to date");
            self.phase = CyclePhase::Checked { has_work: false };
            return UpdateResult::NotAvailable;
        }

        info!(
            pending = diff.pending.len(),
            stale = diff.stale.len(),
            bytes = diff.bytes_to_download,
            purged = self.cache_purged,
            "Content update available"
        );

        self.progress.set_to_download(diff.bytes_to_download);
        self.cycle.pending = diff.pending;
        self.cycle.stale = diff.stale;
        if !self.cycle.pending.is_empty() {
            self.cycle.cached = self.prepare_resume(&server);
        }
        self.cycle.server_manifest = Some(server);
        self.phase = CyclePhase::Checked { has_work: true };

        if self.cache_purged {
            UpdateResult::AvailableBlocking
        } else {
            UpdateResult::Available
        }
    }

    /// Reconcile the temp directory with a new server manifest.
    ///
    /// Returns the pending packages whose archives can be reused.
    fn prepare_resume(&self, server: &ManifestDocument) -> HashSet<String> {
        match self.try_prepare_resume(server) {
            Ok(cached) => cached,
            Err(e) => {
                warn!(error = %e, "Could not reuse earlier downloads, starting fresh");
                if let Err(e) = self.fs.delete_directory(StorageLocation::Dlc, TEMP_DIR) {
                    warn!(error = %e, "Failed to clear temporary download directory");
                }
                HashSet::new()
            }
        }
    }

    fn try_prepare_resume(&self, server: &ManifestDocument) -> CmsResult<HashSet<String>> {
        let snapshot = serialize_manifest(&server.without_timestamp())?;

        if !self.fs.exists(StorageLocation::Dlc, TEMP_MANIFEST_FILE) {
            self.save_snapshot(&snapshot)?;
            return Ok(HashSet::new());
        }

        self.write(DOWNLOADED_MANIFEST_FILE, snapshot.as_bytes())?;
        let fresh = self
            .checksums
            .checksum(StorageLocation::Dlc, DOWNLOADED_MANIFEST_FILE);
        let previous = self
            .checksums
            .checksum(StorageLocation::Dlc, TEMP_MANIFEST_FILE);
        if let Err(e) = self
            .fs
            .delete_file(StorageLocation::Dlc, DOWNLOADED_MANIFEST_FILE)
        {
            debug!(error = %e, "Failed to remove manifest scratch copy");
        }

        if fresh.is_empty() || fresh != previous {
            info!("Server manifest changed since the interrupted download, discarding it");
            self.fs
                .delete_directory(StorageLocation::Dlc, TEMP_DIR)
                .map_err(|e| CmsError::DeleteFailed {
                    location: StorageLocation::Dlc,
                    path: TEMP_DIR.to_string(),
                    source: e,
                })?;
            self.save_snapshot(&snapshot)?;
            return Ok(HashSet::new());
        }

        let archives = self
            .fs
            .list_files_with_extension(StorageLocation::Dlc, TEMP_DIR, ARCHIVE_EXTENSION)
            .map_err(|e| CmsError::ReadFailed {
                location: StorageLocation::Dlc,
                path: TEMP_DIR.to_string(),
                source: e,
            })?;

        let mut cached = HashSet::new();
        for name in archives {
            let reusable = package_id_from_archive(&name)
                .and_then(|id| self.cycle.pending.iter().find(|p| p.id == id))
                .filter(|p| {
                    self.checksums
                        .matches(StorageLocation::Dlc, &archive_path(&p.id), &p.checksum)
                });

            match reusable {
                Some(package) => {
                    debug!(package = %package.id, "Reusing downloaded archive");
                    cached.insert(package.id.clone());
                }
                None => {
                    let path = format!("{}/{}", TEMP_DIR, name);
                    debug!(path = %path, "Discarding unusable archive");
                    self.fs
                        .delete_file(StorageLocation::Dlc, &path)
                        .map_err(|e| CmsError::DeleteFailed {
                            location: StorageLocation::Dlc,
                            path,
                            source: e,
                        })?;
                }
            }
        }

        if !cached.is_empty() {
            info!(packages = cached.len(), "Resuming interrupted download");
        }
        Ok(cached)
    }

    fn save_snapshot(&self, snapshot: &str) -> CmsResult<()> {
        self.fs
            .create_directory(StorageLocation::Dlc, TEMP_DIR)
            .map_err(|e| CmsError::CreateDirFailed {
                location: StorageLocation::Dlc,
                path: TEMP_DIR.to_string(),
                source: e,
            })?;
        self.write(TEMP_MANIFEST_FILE, snapshot.as_bytes())
    }

    fn write(&self, path: &str, bytes: &[u8]) -> CmsResult<()> {
        self.fs
            .write_file(StorageLocation::Dlc, path, bytes)
            .map_err(|e| CmsError::WriteFailed {
                location: StorageLocation::Dlc,
                path: path.to_string(),
                source: e,
            })
    }

    /// Download every package the last check scheduled.
    ///
    /// On failure the whole cycle is discarded; run a new check to retry.
    pub async fn download_updates(
        &mut self,
        on_progress: Option<DownloadProgressCallback>,
    ) -> PhaseResult {
        if self.cycle.downloaded {
            debug!("Packages already downloaded this cycle");
            self.phase = CyclePhase::Downloaded;
            return PhaseResult::Succeeded;
        }

        self.phase = CyclePhase::Downloading;

        if self.cycle.pending.is_empty() {
            debug!("Nothing to download");
            self.cycle.downloaded = true;
            self.phase = CyclePhase::Downloaded;
            return PhaseResult::Succeeded;
        }

        let result = {
            let mut orchestrator = PackageDownloadOrchestrator::new(
                &*self.fs,
                &*self.downloader,
                &self.checksums,
                &self.progress,
            );
            orchestrator
                .run(&self.cycle.pending, &self.cycle.cached, on_progress.as_ref())
                .await
        };

        match result {
            Ok(()) => {
                self.cycle.downloaded = true;
                self.phase = CyclePhase::Downloaded;
                PhaseResult::Succeeded
            }
            Err(e) => {
                error!(error = %e, "Download failed");
                self.clear_download_data();
                self.phase = CyclePhase::DownloadFailed;
                PhaseResult::Failed
            }
        }
    }

    /// Install downloaded packages, remove stale ones and commit the manifest.
    ///
    /// Blocks until extraction and removal have finished on the install pool.
    pub fn install_updates(&mut self) -> PhaseResult {
        self.phase = CyclePhase::Installing;

        let result = self.install_cycle();
        self.clear_download_data();

        match result {
            Ok(report) => {
                debug!(?report, "Install report");
                self.cache_purged = false;
                self.phase = CyclePhase::Installed;
                PhaseResult::Succeeded
            }
            Err(e) => {
                error!(error = %e, "Install failed");
                self.phase = CyclePhase::InstallFailed;
                PhaseResult::Failed
            }
        }
    }

    fn install_cycle(&self) -> CmsResult<InstallReport> {
        let manifest = self
            .cycle
            .server_manifest
            .as_ref()
            .ok_or(CmsError::NothingToInstall)?;

        if !self.cycle.pending.is_empty() && !self.cycle.downloaded {
            warn!("Install requested before pending packages were downloaded");
            return Err(CmsError::NothingToInstall);
        }

        self.installer
            .install(&self.cycle.pending, &self.cycle.stale, manifest)
    }
}
