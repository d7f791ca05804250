//! XML wire format for content manifests.
//!
//! ```text
//! <Manifest DLCEnabled="true" Timestamp="...">
//!   <Package ID="PackageA" URL="..." Checksum="..." Size="1024" MinVersion="1.2.0">
//!     <File Location="PackageA/texture.png" Checksum="..."/>
//!     <File Name="legacy.png" Checksum="..."/>      <!-- read as PackageA/legacy.png -->
//!   </Package>
//! </Manifest>
//! ```
//!
//! The root element name is not checked. Missing attributes take empty/zero
//! defaults, matching how older manifests were authored.

use std::collections::HashSet;
use std::path::{Component, Path};

use serde::{Deserialize, Deserializer, Serialize};

use super::error::ManifestError;
use super::model::{FileEntry, ManifestDocument, Package};
use crate::layout::{DOWNLOADED_MANIFEST_FILE, MANIFEST_FILE, TEMP_DIR};

#[derive(Debug, Deserialize, Serialize)]
#[serde(rename = "Manifest")]
struct RawManifest {
    #[serde(rename = "@DLCEnabled", default)]
    dlc_enabled: bool,

    #[serde(rename = "@Timestamp", default, skip_serializing_if = "Option::is_none")]
    timestamp: Option<String>,

    #[serde(rename = "Package", default)]
    packages: Vec<RawPackage>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawPackage {
    #[serde(rename = "@ID", default)]
    id: String,

    #[serde(rename = "@URL", default)]
    url: String,

    #[serde(rename = "@Checksum", default)]
    checksum: String,

    #[serde(rename = "@Size", default, deserialize_with = "lenient_size")]
    size: u32,

    #[serde(rename = "@MinVersion", default, skip_serializing_if = "Option::is_none")]
    min_version: Option<String>,

    #[serde(rename = "File", default)]
    files: Vec<RawFile>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawFile {
    #[serde(rename = "@Location", default)]
    location: String,

    #[serde(rename = "@Name", default, skip_serializing_if = "String::is_empty")]
    name: String,

    #[serde(rename = "@Checksum", default)]
    checksum: String,
}

/// A `Size` that is not a number counts as zero.
fn lenient_size<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
    let text = String::deserialize(deserializer)?;
    Ok(text.trim().parse().unwrap_or(0))
}

impl RawFile {
    fn into_entry(self, package_id: &str) -> FileEntry {
        let relative_path = if self.location.is_empty() {
            format!("{}/{}", package_id, self.name)
        } else {
            self.location
        };
        FileEntry::new(relative_path, self.checksum)
    }
}

impl From<RawPackage> for Package {
    fn from(raw: RawPackage) -> Self {
        let files = raw
            .files
            .into_iter()
            .map(|f| f.into_entry(&raw.id))
            .collect();
        Self {
            id: raw.id,
            url: raw.url,
            checksum: raw.checksum,
            size_bytes: raw.size,
            min_version: raw.min_version,
            files,
        }
    }
}

impl From<&Package> for RawPackage {
    fn from(package: &Package) -> Self {
        Self {
            id: package.id.clone(),
            url: package.url.clone(),
            checksum: package.checksum.clone(),
            size: package.size_bytes,
            min_version: package.min_version.clone(),
            files: package
                .files
                .iter()
                .map(|f| RawFile {
                    location: f.relative_path.clone(),
                    name: String::new(),
                    checksum: f.checksum.clone(),
                })
                .collect(),
        }
    }
}

/// Parse a manifest document.
///
/// # Errors
///
/// Returns [`ManifestError::Empty`] for a document with no content and
/// [`ManifestError::Decode`] for anything that is not a manifest element.
pub fn parse_manifest(xml: &str) -> Result<ManifestDocument, ManifestError> {
    if xml.trim().is_empty() {
        return Err(ManifestError::Empty);
    }

    let raw: RawManifest =
        quick_xml::de::from_str(xml).map_err(|e| ManifestError::Decode(e.to_string()))?;

    let packages: Vec<Package> = raw.packages.into_iter().map(Package::from).collect();
    validate_package_ids(&packages)?;

    Ok(ManifestDocument {
        dlc_enabled: raw.dlc_enabled,
        timestamp: raw.timestamp,
        packages,
    })
}

/// Package IDs name directories in the DLC root, so each must be a single
/// plain path component that no pipeline file already uses.
fn validate_package_ids(packages: &[Package]) -> Result<(), ManifestError> {
    let mut seen = HashSet::new();

    for package in packages {
        let id = package.id.as_str();
        let invalid = |reason| ManifestError::InvalidPackageId {
            id: id.to_string(),
            reason,
        };

        if id.trim().is_empty() {
            return Err(invalid("empty"));
        }
        let mut components = Path::new(id).components();
        let single_component = matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        );
        if !single_component || id.contains(['/', '\\']) {
            return Err(invalid("not a single path component"));
        }
        if [TEMP_DIR, MANIFEST_FILE, DOWNLOADED_MANIFEST_FILE].contains(&id) {
            return Err(invalid("reserved name"));
        }
        if !seen.insert(id) {
            return Err(ManifestError::DuplicatePackageId(id.to_string()));
        }
    }

    Ok(())
}

/// Parse a manifest from raw downloaded bytes.
pub fn parse_manifest_bytes(bytes: &[u8]) -> Result<ManifestDocument, ManifestError> {
    let xml = std::str::from_utf8(bytes).map_err(|_| ManifestError::InvalidUtf8)?;
    parse_manifest(xml.trim_start_matches('\u{feff}'))
}

/// Serialize a manifest document, including the XML declaration.
pub fn serialize_manifest(manifest: &ManifestDocument) -> Result<String, ManifestError> {
    let raw = RawManifest {
        dlc_enabled: manifest.dlc_enabled,
        timestamp: manifest.timestamp.clone(),
        packages: manifest.packages.iter().map(RawPackage::from).collect(),
    };

    let mut body = String::new();
    let mut serializer = quick_xml::se::Serializer::new(&mut body);
    serializer.indent(' ', 2);
    raw.serialize(serializer)
        .map_err(|e| ManifestError::Encode(e.to_string()))?;

    Ok(format!("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n{}\n", body))
}
