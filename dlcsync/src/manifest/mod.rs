//! Content manifest model and codec.
//!
//! A manifest lists every downloadable package with its archive checksum and
//! the checksum of each file it installs. The same format is used for the
//! server's published manifest and the locally committed copy.
//!
//! ```text
//! ManifestDocument
//! ├── dlc_enabled: bool
//! └── packages: Vec<Package>
//!         ├── id / url / checksum / size_bytes
//!         └── files: Vec<FileEntry { relative_path, checksum }>
//! ```

mod error;
mod model;
mod xml;

pub use error::ManifestError;
pub use model::{FileEntry, ManifestDocument, Package};
pub use xml::{parse_manifest, parse_manifest_bytes, serialize_manifest};
