//! The network collaborator.
//!
//! A downloader fetches the manifest or a package and reports what it got as
//! a stream of [`DownloadEvent`]s. Large payloads arrive as any number of
//! `Flushed` chunks followed by exactly one terminal `Succeeded` or `Failed`.

use bytes::{Bytes, BytesMut};
use tokio::sync::mpsc;

use crate::error::{CmsError, CmsResult};

/// Capacity of a download event channel.
pub const EVENT_BUFFER: usize = 16;

/// One step of a transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadEvent {
    /// An intermediate chunk, flushed because the transport's buffer filled.
    Flushed(Bytes),
    /// The transfer completed; carries whatever was not flushed yet.
    Succeeded(Bytes),
    /// The transfer failed.
    Failed(String),
}

impl DownloadEvent {
    /// Whether this event ends the transfer.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Flushed(_))
    }
}

/// Receiving end of a transfer.
pub type DownloadStream = mpsc::Receiver<DownloadEvent>;

/// Fetches manifests and package archives.
///
/// Implementations are asked for one transfer at a time.
pub trait ContentDownloader: Send + Sync {
    /// Start fetching the server manifest.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::DownloadNotStarted`] if the request cannot be issued.
    fn download_manifest(&self) -> CmsResult<DownloadStream>;

    /// Start fetching a package archive.
    ///
    /// # Errors
    ///
    /// Returns [`CmsError::DownloadNotStarted`] if the request cannot be issued.
    fn download_package(&self, url: &str) -> CmsResult<DownloadStream>;

    /// Bytes received so far for the transfer in flight.
    fn current_downloaded_bytes(&self) -> u32;
}

/// Drain a stream into one buffer.
///
/// A stream that closes without a terminal event is a failure.
pub async fn collect(mut stream: DownloadStream, url: &str) -> CmsResult<Bytes> {
    let mut body = BytesMut::new();

    while let Some(event) = stream.recv().await {
        match event {
            DownloadEvent::Flushed(chunk) => body.extend_from_slice(&chunk),
            DownloadEvent::Succeeded(chunk) => {
                body.extend_from_slice(&chunk);
                return Ok(body.freeze());
            }
            DownloadEvent::Failed(reason) => {
                return Err(CmsError::DownloadFailed {
                    url: url.to_string(),
                    reason,
                })
            }
        }
    }

    Err(CmsError::DownloadFailed {
        url: url.to_string(),
        reason: "transfer ended without a result".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn stream_of(events: Vec<DownloadEvent>) -> DownloadStream {
        let (tx, rx) = mpsc::channel(events.len().max(1));
        for event in events {
            tx.send(event).await.unwrap();
        }
        rx
    }

    #[tokio::test]
    async fn test_collect_joins_flushed_chunks() {
        let stream = stream_of(vec![
            DownloadEvent::Flushed(Bytes::from_static(b"he")),
            DownloadEvent::Flushed(Bytes::from_static(b"ll")),
            DownloadEvent::Succeeded(Bytes::from_static(b"o")),
        ])
        .await;

        let body = collect(stream, "manifest").await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_collect_failure() {
        let stream = stream_of(vec![
            DownloadEvent::Flushed(Bytes::from_static(b"partial")),
            DownloadEvent::Failed("connection reset".to_string()),
        ])
        .await;

        let err = collect(stream, "manifest").await.unwrap_err();
        assert!(matches!(err, CmsError::DownloadFailed { reason, .. } if reason == "connection reset"));
    }

    #[tokio::test]
    async fn test_collect_closed_stream_is_failure() {
        let stream = stream_of(vec![DownloadEvent::Flushed(Bytes::from_static(b"x"))]).await;
        assert!(collect(stream, "manifest").await.is_err());
    }

    #[test]
    fn test_terminal_events() {
        assert!(!DownloadEvent::Flushed(Bytes::new()).is_terminal());
        assert!(DownloadEvent::Succeeded(Bytes::new()).is_terminal());
        assert!(DownloadEvent::Failed(String::new()).is_terminal());
    }
}
