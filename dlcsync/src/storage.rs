//! File-system collaborator.
//!
//! The pipeline never touches `std::fs` directly. All file access goes through
//! the [`FileSystem`] trait, addressed by a [`StorageLocation`] and a
//! `/`-separated path relative to that location's root. This keeps the bundle
//! (read-only) and DLC cache (writable) roots swappable per platform.

use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};

/// Logical storage roots known to the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageLocation {
    /// Content shipped inside the application bundle. Read-only.
    Package,
    /// Writable cache holding downloaded content and the local manifest.
    Dlc,
}

impl StorageLocation {
    /// Whether the pipeline may write to this location.
    pub fn is_writable(&self) -> bool {
        matches!(self, Self::Dlc)
    }
}

impl fmt::Display for StorageLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Package => write!(f, "package"),
            Self::Dlc => write!(f, "dlc"),
        }
    }
}

/// File operations consumed by the content pipeline.
///
/// Implementations must be safe to call from several threads at once as long
/// as the calls target disjoint directories; the installer relies on this for
/// its parallel extraction.
pub trait FileSystem: Send + Sync {
    /// Check whether a file or directory exists.
    fn exists(&self, location: StorageLocation, path: &str) -> bool;

    /// Create a directory and all of its parents.
    fn create_directory(&self, location: StorageLocation, path: &str) -> io::Result<()>;

    /// Create or replace a file with the given contents.
    fn write_file(&self, location: StorageLocation, path: &str, bytes: &[u8]) -> io::Result<()>;

    /// Delete a file. Deleting a missing file succeeds.
    fn delete_file(&self, location: StorageLocation, path: &str) -> io::Result<()>;

    /// Delete a directory recursively. Deleting a missing directory succeeds.
    fn delete_directory(&self, location: StorageLocation, path: &str) -> io::Result<()>;

    /// Open a file for binary append, creating it if needed.
    fn open_append(
        &self,
        location: StorageLocation,
        path: &str,
    ) -> io::Result<Box<dyn Write + Send>>;

    /// Open a file for reading.
    fn open_read(&self, location: StorageLocation, path: &str) -> io::Result<Box<dyn Read + Send>>;

    /// List the names of files directly inside `dir` with the given extension.
    fn list_files_with_extension(
        &self,
        location: StorageLocation,
        dir: &str,
        extension: &str,
    ) -> io::Result<Vec<String>>;

    /// Absolute path of a storage location's root.
    fn storage_path(&self, location: StorageLocation) -> PathBuf;
}

/// Directory-backed [`FileSystem`].
///
/// Each storage location maps to a directory on disk. Writes to
/// [`StorageLocation::Package`] are rejected.
#[derive(Debug, Clone)]
pub struct LocalFileSystem {
    bundle_root: PathBuf,
    dlc_root: PathBuf,
}

impl LocalFileSystem {
    /// Create a file system over the given bundle and DLC roots.
    pub fn new(bundle_root: impl Into<PathBuf>, dlc_root: impl Into<PathBuf>) -> Self {
        Self {
            bundle_root: bundle_root.into(),
            dlc_root: dlc_root.into(),
        }
    }

    fn root(&self, location: StorageLocation) -> &Path {
        match location {
            StorageLocation::Package => &self.bundle_root,
            StorageLocation::Dlc => &self.dlc_root,
        }
    }

    /// Resolve a relative path inside a location, refusing anything that
    /// would escape the root.
    fn resolve(&self, location: StorageLocation, path: &str) -> io::Result<PathBuf> {
        let mut resolved = self.root(location).to_path_buf();
        for component in Path::new(path.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    return Err(io::Error::new(
                        io::ErrorKind::InvalidInput,
                        format!("path escapes storage root: {}", path),
                    ))
                }
            }
        }
        Ok(resolved)
    }

    fn writable(&self, location: StorageLocation, path: &str) -> io::Result<PathBuf> {
        if !location.is_writable() {
            return Err(io::Error::new(
                io::ErrorKind::PermissionDenied,
                format!("{} is read-only", location),
            ));
        }
        self.resolve(location, path)
    }
}

fn ignore_not_found(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

impl FileSystem for LocalFileSystem {
    fn exists(&self, location: StorageLocation, path: &str) -> bool {
        self.resolve(location, path)
            .map(|p| p.exists())
            .unwrap_or(false)
    }

    fn create_directory(&self, location: StorageLocation, path: &str) -> io::Result<()> {
        fs::create_dir_all(self.writable(location, path)?)
    }

    fn write_file(&self, location: StorageLocation, path: &str, bytes: &[u8]) -> io::Result<()> {
        let target = self.writable(location, path)?;
        let file_name = target
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?
            .to_string_lossy()
            .into_owned();

        // Write beside the target and rename so readers never see a torn file.
        let staging = target.with_file_name(format!(".{}.partial", file_name));
        {
            let mut file = File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&staging, &target).inspect_err(|_| {
            fs::remove_file(&staging).ok();
        })
    }

    fn delete_file(&self, location: StorageLocation, path: &str) -> io::Result<()> {
        ignore_not_found(fs::remove_file(self.writable(location, path)?))
    }

    fn delete_directory(&self, location: StorageLocation, path: &str) -> io::Result<()> {
        ignore_not_found(fs::remove_dir_all(self.writable(location, path)?))
    }

    fn open_append(
        &self,
        location: StorageLocation,
        path: &str,
    ) -> io::Result<Box<dyn Write + Send>> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.writable(location, path)?)?;
        Ok(Box::new(file))
    }

    fn open_read(&self, location: StorageLocation, path: &str) -> io::Result<Box<dyn Read + Send>> {
        let file = File::open(self.resolve(location, path)?)?;
        Ok(Box::new(io::BufReader::new(file)))
    }

    fn list_files_with_extension(
        &self,
        location: StorageLocation,
        dir: &str,
        extension: &str,
    ) -> io::Result<Vec<String>> {
        let entries = match fs::read_dir(self.resolve(location, dir)?) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e),
        };

        let mut names = Vec::new();
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_file() && path.extension().is_some_and(|ext| ext == extension) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }

    fn storage_path(&self, location: StorageLocation) -> PathBuf {
        self.root(location).to_path_buf()
    }
}
