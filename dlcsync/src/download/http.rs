//! HTTP-based content downloader.
//!
//! Streams response bodies with reqwest, handing data to the receiver in
//! `Flushed` chunks whenever more than the flush threshold has accumulated,
//! so a large package never has to sit in memory whole.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::Client;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::downloader::{ContentDownloader, DownloadEvent, DownloadStream, EVENT_BUFFER};
use crate::config::ContentConfig;
use crate::error::{CmsError, CmsResult};

/// Default timeout for HTTP requests in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300; // 5 minutes

/// Default flush threshold (1 MiB).
pub const DEFAULT_FLUSH_THRESHOLD: usize = 1024 * 1024;

/// HTTP downloader for manifests and package archives.
#[derive(Debug)]
pub struct HttpContentDownloader {
    client: Client,
    manifest_url: String,
    flush_threshold: usize,
    pub(crate) timeout: Duration,
    in_flight: Arc<AtomicU64>,
}

impl HttpContentDownloader {
    /// Create a downloader with default timeout and flush threshold.
    pub fn new(manifest_url: impl Into<String>) -> CmsResult<Self> {
        Self::with_settings(
            manifest_url,
            Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            DEFAULT_FLUSH_THRESHOLD,
        )
    }

    /// Create a downloader with a custom timeout and flush threshold.
    pub fn with_settings(
        manifest_url: impl Into<String>,
        timeout: Duration,
        flush_threshold: usize,
    ) -> CmsResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CmsError::InvalidConfig(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            manifest_url: manifest_url.into(),
            flush_threshold: flush_threshold.max(1),
            timeout,
            in_flight: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Create a downloader from pipeline configuration.
    pub fn from_config(config: &ContentConfig) -> CmsResult<Self> {
        Self::with_settings(
            config.manifest_url.clone(),
            config.request_timeout,
            config.flush_threshold_bytes,
        )
    }

    /// URL the manifest is fetched from.
    pub fn manifest_url(&self) -> &str {
        &self.manifest_url
    }

    fn start(&self, url: &str) -> CmsResult<DownloadStream> {
        let not_started = |reason: String| CmsError::DownloadNotStarted {
            url: url.to_string(),
            reason,
        };

        let runtime = Handle::try_current().map_err(|e| not_started(e.to_string()))?;
        let parsed = reqwest::Url::parse(url).map_err(|e| not_started(e.to_string()))?;

        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        self.in_flight.store(0, Ordering::SeqCst);

        let transfer = Transfer {
            client: self.client.clone(),
            url: parsed,
            flush_threshold: self.flush_threshold,
            timeout: self.timeout,
            received: Arc::clone(&self.in_flight),
            events: tx,
        };
        runtime.spawn(transfer.run());

        Ok(rx)
    }
}

impl ContentDownloader for HttpContentDownloader {
    fn download_manifest(&self) -> CmsResult<DownloadStream> {
        debug!(url = %self.manifest_url, "Fetching manifest");
        self.start(&self.manifest_url)
    }

    fn download_package(&self, url: &str) -> CmsResult<DownloadStream> {
        debug!(url, "Fetching package");
        self.start(url)
    }

    fn current_downloaded_bytes(&self) -> u32 {
        self.in_flight
            .load(Ordering::SeqCst)
            .min(u64::from(u32::MAX)) as u32
    }
}

/// A single request in flight.
struct Transfer {
    client: Client,
    url: reqwest::Url,
    flush_threshold: usize,
    timeout: Duration,
    received: Arc<AtomicU64>,
    events: mpsc::Sender<DownloadEvent>,
}

impl Transfer {
    async fn run(self) {
        let terminal = match self.stream_body().await {
            Ok(rest) => DownloadEvent::Succeeded(rest),
            Err(reason) => {
                warn!(url = %self.url, reason = %reason, "Transfer failed");
                DownloadEvent::Failed(reason)
            }
        };
        // Receiver may be gone if the cycle was abandoned
        self.events.send(terminal).await.ok();
    }

    async fn stream_body(&self) -> Result<Bytes, String> {
        let mut response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    format!("timed out after {}s", self.timeout.as_secs())
                } else {
                    e.to_string()
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("GET request failed with status {}", status));
        }

        let mut buffer = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("Read error: {}", e))?
        {
            self.received
                .fetch_add(chunk.len() as u64, Ordering::SeqCst);
            buffer.extend_from_slice(&chunk);

            if buffer.len() > self.flush_threshold {
                let flushed = buffer.split().freeze();
                self.events
                    .send(DownloadEvent::Flushed(flushed))
                    .await
                    .map_err(|_| "receiver dropped".to_string())?;
            }
        }

        Ok(buffer.freeze())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::download::collect;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve one canned HTTP response on a local port.
    async fn serve_once(status_line: &'static str, body: Vec<u8>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            let head = format!(
                "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                status_line,
                body.len()
            );
            socket.write_all(head.as_bytes()).await.unwrap();
            socket.write_all(&body).await.unwrap();
            socket.shutdown().await.ok();
        });

        format!("http://{}/content", addr)
    }

    #[test]
    fn test_http_downloader_new() {
        let downloader = HttpContentDownloader::new("http://localhost/manifest").unwrap();
        assert_eq!(downloader.timeout.as_secs(), DEFAULT_TIMEOUT_SECS);
        assert_eq!(downloader.manifest_url(), "http://localhost/manifest");
        assert_eq!(downloader.current_downloaded_bytes(), 0);
    }

    #[test]
    fn test_http_downloader_with_settings() {
        let downloader =
            HttpContentDownloader::with_settings("http://localhost/m", Duration::from_secs(60), 0)
                .unwrap();
        assert_eq!(downloader.timeout.as_secs(), 60);
        assert_eq!(downloader.flush_threshold, 1);
    }

    #[test]
    fn test_no_runtime_is_not_started() {
        let downloader = HttpContentDownloader::new("http://localhost/m").unwrap();
        let err = downloader.download_manifest().unwrap_err();
        assert!(matches!(err, CmsError::DownloadNotStarted { .. }));
    }

    #[tokio::test]
    async fn test_invalid_url_is_not_started() {
        let downloader = HttpContentDownloader::new("not a url").unwrap();
        let err = downloader.download_manifest().unwrap_err();
        assert!(matches!(err, CmsError::DownloadNotStarted { .. }));
    }

    #[tokio::test]
    async fn test_large_body_is_flushed() {
        let body: Vec<u8> = (0..4096u32).map(|i| (i % 251) as u8).collect();
        let url = serve_once("200 OK", body.clone()).await;

        let downloader =
            HttpContentDownloader::with_settings(&url, Duration::from_secs(10), 512).unwrap();
        let mut stream = downloader.download_package(&url).unwrap();

        let mut received = Vec::new();
        let mut flushes = 0;
        while let Some(event) = stream.recv().await {
            match event {
                DownloadEvent::Flushed(chunk) => {
                    flushes += 1;
                    received.extend_from_slice(&chunk);
                }
                DownloadEvent::Succeeded(chunk) => {
                    received.extend_from_slice(&chunk);
                    break;
                }
                DownloadEvent::Failed(reason) => panic!("transfer failed: {}", reason),
            }
        }

        assert!(flushes >= 1);
        assert_eq!(received, body);
        assert_eq!(downloader.current_downloaded_bytes(), 4096);
    }

    #[tokio::test]
    async fn test_manifest_fetch() {
        let url = serve_once("200 OK", b"<Manifest DLCEnabled=\"true\"/>".to_vec()).await;

        let downloader = HttpContentDownloader::new(&url).unwrap();
        let body = collect(downloader.download_manifest().unwrap(), &url)
            .await
            .unwrap();
        assert_eq!(&body[..], b"<Manifest DLCEnabled=\"true\"/>");
    }

    #[tokio::test]
    async fn test_error_status_fails() {
        let url = serve_once("404 Not Found", Vec::new()).await;

        let downloader = HttpContentDownloader::new(&url).unwrap();
        let err = collect(downloader.download_package(&url).unwrap(), &url)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
