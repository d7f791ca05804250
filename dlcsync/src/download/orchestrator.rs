//! Sequential package download orchestrator.
//!
//! Downloads the pending packages strictly one at a time, in list order,
//! appending each transfer's chunks to `_Temp-CMS/<id>.packzip` and
//! verifying the finished archive against the package checksum. The first
//! failure of any kind abandons the cycle and removes the temp directory so
//! no partial archive survives.

use std::collections::HashSet;
use std::io::Write;

use tracing::{debug, info, warn};

use super::downloader::{ContentDownloader, DownloadEvent};
use super::progress::{overall_fraction, DownloadProgress, DownloadProgressCallback};
use crate::checksum::ChecksumService;
use crate::error::{CmsError, CmsResult};
use crate::layout::{archive_path, TEMP_DIR};
use crate::manifest::Package;
use crate::storage::{FileSystem, StorageLocation};

/// Where the orchestrator is in its run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// Not started.
    Idle,
    /// Package at this index is in flight.
    Downloading(usize),
    /// Every package is downloaded and verified.
    InstallPending,
    /// The cycle was abandoned.
    Failed,
}

/// Drives the download phase of one update cycle.
pub struct PackageDownloadOrchestrator<'a> {
    fs: &'a dyn FileSystem,
    downloader: &'a dyn ContentDownloader,
    checksums: &'a ChecksumService,
    progress: &'a DownloadProgress,
    state: OrchestratorState,
}

impl<'a> PackageDownloadOrchestrator<'a> {
    /// Create an orchestrator over the pipeline's collaborators.
    pub fn new(
        fs: &'a dyn FileSystem,
        downloader: &'a dyn ContentDownloader,
        checksums: &'a ChecksumService,
        progress: &'a DownloadProgress,
    ) -> Self {
        Self {
            fs,
            downloader,
            checksums,
            progress,
            state: OrchestratorState::Idle,
        }
    }

    /// Current state.
    pub fn state(&self) -> OrchestratorState {
        self.state
    }

    /// Download every package in `packages`.
    ///
    /// Packages named in `already_downloaded` have a verified archive in the
    /// temp directory from an interrupted earlier run; they are counted but
    /// not fetched again.
    ///
    /// # Errors
    ///
    /// Returns the first transport, storage or checksum failure. The temp
    /// directory has been removed by the time the error is returned.
    pub async fn run(
        &mut self,
        packages: &[Package],
        already_downloaded: &HashSet<String>,
        on_progress: Option<&DownloadProgressCallback>,
    ) -> CmsResult<()> {
        let result = self.download_all(packages, already_downloaded, on_progress).await;

        match &result {
            Ok(()) => {
                self.state = OrchestratorState::InstallPending;
                info!(packages = packages.len(), "All packages downloaded");
            }
            Err(e) => {
                self.state = OrchestratorState::Failed;
                warn!(error = %e, "Download cycle failed, discarding temporary archives");
                if let Err(e) = self.fs.delete_directory(StorageLocation::Dlc, TEMP_DIR) {
                    warn!(error = %e, "Failed to remove temporary download directory");
                }
            }
        }

        result
    }

    async fn download_all(
        &mut self,
        packages: &[Package],
        already_downloaded: &HashSet<String>,
        on_progress: Option<&DownloadProgressCallback>,
    ) -> CmsResult<()> {
        self.fs
            .create_directory(StorageLocation::Dlc, TEMP_DIR)
            .map_err(|e| CmsError::CreateDirFailed {
                location: StorageLocation::Dlc,
                path: TEMP_DIR.to_string(),
                source: e,
            })?;

        let count = packages.len();
        for (index, package) in packages.iter().enumerate() {
            self.state = OrchestratorState::Downloading(index);

            if already_downloaded.contains(&package.id) {
                debug!(package = %package.id, "Archive already downloaded");
            } else {
                self.download_package(package, index, count, on_progress)
                    .await?;
            }

            self.progress.add_downloaded(package.size_bytes);
            if let Some(cb) = on_progress {
                cb(&package.id, overall_fraction(index, count, 1.0));
            }
        }

        Ok(())
    }

    async fn download_package(
        &self,
        package: &Package,
        index: usize,
        count: usize,
        on_progress: Option<&DownloadProgressCallback>,
    ) -> CmsResult<()> {
        let path = archive_path(&package.id);

        // Never append onto a leftover archive from an earlier attempt
        self.fs
            .delete_file(StorageLocation::Dlc, &path)
            .map_err(|e| CmsError::DeleteFailed {
                location: StorageLocation::Dlc,
                path: path.clone(),
                source: e,
            })?;

        info!(package = %package.id, bytes = package.size_bytes, "Downloading package");
        let mut stream = self.downloader.download_package(&package.url)?;

        loop {
            let event = stream.recv().await.unwrap_or_else(|| {
                DownloadEvent::Failed("transfer ended without a result".to_string())
            });

            match event {
                DownloadEvent::Flushed(chunk) => {
                    self.append(&path, &chunk)?;
                    self.report_in_flight(package, index, count, on_progress);
                }
                DownloadEvent::Succeeded(chunk) => {
                    self.append(&path, &chunk)?;
                    return self.verify(package, &path);
                }
                DownloadEvent::Failed(reason) => {
                    return Err(CmsError::DownloadFailed {
                        url: package.url.clone(),
                        reason,
                    })
                }
            }
        }
    }

    fn append(&self, path: &str, chunk: &[u8]) -> CmsResult<()> {
        let write_failed = |source| CmsError::WriteFailed {
            location: StorageLocation::Dlc,
            path: path.to_string(),
            source,
        };

        let mut stream = self
            .fs
            .open_append(StorageLocation::Dlc, path)
            .map_err(write_failed)?;
        stream.write_all(chunk).map_err(write_failed)?;
        stream.flush().map_err(write_failed)
    }

    fn verify(&self, package: &Package, path: &str) -> CmsResult<()> {
        let actual = self.checksums.checksum(StorageLocation::Dlc, path);
        if actual.is_empty() || actual != package.checksum {
            return Err(CmsError::ChecksumMismatch {
                package: package.id.clone(),
                expected: package.checksum.clone(),
                actual,
            });
        }
        debug!(package = %package.id, "Archive checksum verified");
        Ok(())
    }

    fn report_in_flight(
        &self,
        package: &Package,
        index: usize,
        count: usize,
        on_progress: Option<&DownloadProgressCallback>,
    ) {
        let Some(cb) = on_progress else {
            return;
        };
        let fraction = if package.size_bytes == 0 {
            0.0
        } else {
            self.downloader.current_downloaded_bytes() as f32 / package.size_bytes as f32
        };
        cb(&package.id, overall_fraction(index, count, fraction));
    }
}
