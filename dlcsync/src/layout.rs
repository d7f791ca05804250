//! Names of the files and directories the pipeline owns inside the DLC cache.

/// Directory holding in-flight package archives and the resume snapshot.
pub const TEMP_DIR: &str = "_Temp-CMS";

/// The committed local manifest.
pub const MANIFEST_FILE: &str = "ContentManifest.moman";

/// Snapshot of the server manifest a download cycle started from.
pub const TEMP_MANIFEST_FILE: &str = "_Temp-CMS/ContentManifestTemp.moman";

/// Scratch copy of a freshly fetched manifest, compared against the snapshot.
pub const DOWNLOADED_MANIFEST_FILE: &str = "DownloadedContentManifestTemp.moman";

/// Extension of downloaded package archives.
pub const ARCHIVE_EXTENSION: &str = "packzip";

/// Persistent-store key recording that DLC was installed at least once.
pub const INSTALLED_MARKER_KEY: &str = "_CMSCachedDLC";

/// Path of a package's in-flight archive.
pub fn archive_path(package_id: &str) -> String {
    format!("{}/{}.{}", TEMP_DIR, package_id, ARCHIVE_EXTENSION)
}

/// Package ID encoded in an archive file name, if it is one.
pub fn package_id_from_archive(file_name: &str) -> Option<&str> {
    file_name
        .strip_suffix(ARCHIVE_EXTENSION)
        .and_then(|stem| stem.strip_suffix('.'))
        .filter(|id| !id.is_empty())
}
