//! dlcsync - manifest-driven content updates
//!
//! Keeps a device's downloadable content in step with a server manifest:
//! check what changed, download only what is missing and verified, then
//! install everything or nothing.
//!
//! ```text
//! ContentManagementSystem
//!     ├── ManifestDiff ────────────── server vs local, bundle/DLC probes
//!     ├── PackageDownloadOrchestrator ─ sequential, resumable, verified
//!     └── AtomicInstaller ─────────── parallel extract, manifest commit
//! ```
//!
//! Storage, persistence and transport sit behind the [`storage::FileSystem`],
//! [`store::PersistentStore`] and [`download::ContentDownloader`] traits.

pub mod checksum;
pub mod config;
pub mod diff;
pub mod download;
pub mod error;
pub mod install;
pub mod layout;
pub mod logging;
pub mod manifest;
pub mod storage;
pub mod store;
pub mod system;

pub use checksum::{ChecksumAlgorithm, ChecksumService};
pub use config::{ConfigError, ConfigFile, ContentConfig, StorageSettings};
pub use download::{ContentDownloader, DownloadProgressCallback, HttpContentDownloader};
pub use error::{CmsError, CmsResult};
pub use manifest::{ManifestDocument, Package};
pub use storage::{FileSystem, LocalFileSystem, StorageLocation};
pub use store::{JsonFileStore, MemoryStore, PersistentStore};
pub use system::{ContentManagementSystem, CyclePhase, PhaseResult, UpdateResult};
