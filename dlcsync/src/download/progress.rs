//! Progress reporting for a download cycle.
//!
//! Running byte totals live in atomic counters so a UI thread can poll them
//! while the download future is being driven elsewhere.

use std::sync::atomic::{AtomicU32, Ordering};

/// Per-package progress callback.
///
/// # Arguments
///
/// * `package_id` - ID of the package currently downloading
/// * `overall` - Fraction of the whole cycle completed, `0.0..=1.0`
pub type DownloadProgressCallback = Box<dyn Fn(&str, f32) + Send + Sync>;

/// Running totals for the current update cycle.
#[derive(Debug, Default)]
pub struct DownloadProgress {
    to_download: AtomicU32,
    downloaded: AtomicU32,
}

impl DownloadProgress {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Zero both counters.
    pub fn reset(&self) {
        self.to_download.store(0, Ordering::SeqCst);
        self.downloaded.store(0, Ordering::SeqCst);
    }

    /// Set the number of bytes the cycle needs to download.
    pub fn set_to_download(&self, bytes: u32) {
        self.to_download.store(bytes, Ordering::SeqCst);
    }

    /// Record a completed package.
    pub fn add_downloaded(&self, bytes: u32) {
        let mut current = self.downloaded.load(Ordering::SeqCst);
        loop {
            match self.downloaded.compare_exchange_weak(
                current,
                current.saturating_add(bytes),
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return,
                Err(actual) => current = actual,
            }
        }
    }

    /// Bytes the cycle needs to download.
    pub fn to_download(&self) -> u32 {
        self.to_download.load(Ordering::SeqCst)
    }

    /// Bytes of fully downloaded packages so far.
    pub fn downloaded(&self) -> u32 {
        self.downloaded.load(Ordering::SeqCst)
    }

    /// Completed fraction, `0.0` when nothing needs downloading.
    pub fn fraction(&self) -> f32 {
        let total = self.to_download();
        if total == 0 {
            return 0.0;
        }
        (self.downloaded() as f32 / total as f32).min(1.0)
    }
}

/// Overall fraction for a package at `index` out of `count`, itself
/// `package_fraction` complete.
pub(crate) fn overall_fraction(index: usize, count: usize, package_fraction: f32) -> f32 {
    if count == 0 {
        return 1.0;
    }
    ((index as f32 + package_fraction.clamp(0.0, 1.0)) / count as f32).min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_progress_new() {
        let progress = DownloadProgress::new();
        assert_eq!(progress.to_download(), 0);
        assert_eq!(progress.downloaded(), 0);
        assert_eq!(progress.fraction(), 0.0);
    }

    #[test]
    fn test_progress_accumulates() {
        let progress = DownloadProgress::new();
        progress.set_to_download(200);
        progress.add_downloaded(50);
        progress.add_downloaded(50);

        assert_eq!(progress.downloaded(), 100);
        assert!((progress.fraction() - 0.5).abs() < f32::EPSILON);
    }

    #[test]
    fn test_progress_saturates() {
        let progress = DownloadProgress::new();
        progress.add_downloaded(u32::MAX);
        progress.add_downloaded(10);
        assert_eq!(progress.downloaded(), u32::MAX);
    }

    #[test]
    fn test_progress_reset() {
        let progress = DownloadProgress::new();
        progress.set_to_download(10);
        progress.add_downloaded(10);
        progress.reset();
        assert_eq!(progress.to_download(), 0);
        assert_eq!(progress.downloaded(), 0);
    }

    #[test]
    fn test_progress_shared_across_threads() {
        let progress = Arc::new(DownloadProgress::new());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let progress = Arc::clone(&progress);
                thread::spawn(move || {
                    for _ in 0..100 {
                        progress.add_downloaded(1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(progress.downloaded(), 400);
    }

    #[test]
    fn test_overall_fraction() {
        assert_eq!(overall_fraction(0, 4, 0.0), 0.0);
        assert_eq!(overall_fraction(1, 4, 0.5), 0.375);
        assert_eq!(overall_fraction(3, 4, 1.0), 1.0);
        assert_eq!(overall_fraction(0, 2, 7.0), 0.5);
        assert_eq!(overall_fraction(0, 0, 0.0), 1.0);
    }
}
