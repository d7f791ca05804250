//! Manifest and package downloads.
//!
//! # Architecture
//!
//! ```text
//! PackageDownloadOrchestrator (one package in flight at a time)
//!         │
//!         ├── ContentDownloader (trait)
//!         │       └── HttpContentDownloader
//!         │
//!         ├── ChecksumService (verifies each finished archive)
//!         │
//!         └── DownloadProgress (running totals, polled by the UI)
//! ```
//!
//! Transfers report through [`DownloadEvent`] streams rather than callbacks,
//! so the orchestrator is a plain `async fn` that walks the pending list.

mod downloader;
mod http;
mod orchestrator;
mod progress;

pub use downloader::{collect, ContentDownloader, DownloadEvent, DownloadStream, EVENT_BUFFER};
pub use http::{HttpContentDownloader, DEFAULT_FLUSH_THRESHOLD, DEFAULT_TIMEOUT_SECS};
pub use orchestrator::{OrchestratorState, PackageDownloadOrchestrator};
pub use progress::{DownloadProgress, DownloadProgressCallback};
