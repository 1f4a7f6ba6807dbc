//! File download task executor.
//!
//! - [`DownloadExecutor`] - the [`TaskExecutor`] that verifies or transfers one [`Download`]
//! - [`checksum`] - base64 MD5 helpers for the local integrity check
//!
//! Integrity is checked only before a transfer starts. A transfer that ends
//! early without an error (a server closing the stream short of `size`) is not
//! detected here; the next run sees the digest mismatch and fetches it again.

pub mod checksum;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWriteExt;

use crate::error::{Error, Result};
use crate::metrics::{BYTES_DOWNLOADED, BYTES_TO_DOWNLOAD, MetricStore};
use crate::paths::PathRewrite;
use crate::types::{Download, ExecutionOutcome};
use crate::worker::TaskExecutor;

/// Size of the slices written to disk and counted in `bytes_downloaded`
pub const CHUNK_SIZE: usize = 1024;

/// Verifies a local file against its declared digest and fetches it when needed
///
/// A download's `size` is added to `bytes_to_download` once, on its first
/// transfer attempt. Bytes counted in `bytes_downloaded` are capped at `size`
/// across all attempts for the same local path, so retries never inflate
/// either counter.
pub struct DownloadExecutor {
    http: reqwest::Client,
    metrics: Arc<MetricStore>,
    rewrite: Option<PathRewrite>,
    /// Bytes already counted as downloaded, per local path
    counted: Mutex<HashMap<PathBuf, u64>>,
}

impl DownloadExecutor {
    /// Create an executor reporting into `metrics`
    ///
    /// With `rewrite` set, download paths are moved from the job's destination
    /// root to the local output root before anything touches the disk.
    pub fn new(metrics: Arc<MetricStore>, rewrite: Option<PathRewrite>) -> Result<Self> {
        // No overall timeout: render outputs can take a long time to stream
        let http = reqwest::Client::builder().build()?;
        Ok(Self::with_client(http, metrics, rewrite))
    }

    /// Create an executor sharing an existing HTTP client
    pub fn with_client(
        http: reqwest::Client,
        metrics: Arc<MetricStore>,
        rewrite: Option<PathRewrite>,
    ) -> Self {
        Self {
            http,
            metrics,
            rewrite,
            counted: Mutex::new(HashMap::new()),
        }
    }

    /// Local path a download is written to
    ///
    /// Without an output override the path is used exactly as the service
    /// sent it.
    pub fn resolve_path(&self, download: &Download) -> Result<PathBuf> {
        match &self.rewrite {
            Some(rewrite) => rewrite.apply(&download.path),
            None => Ok(PathBuf::from(&download.path)),
        }
    }

    /// Schedule `size` bytes for `local` unless an earlier attempt already did
    fn schedule(&self, local: &Path, size: u64) {
        let mut counted = self.counted.lock().unwrap_or_else(PoisonError::into_inner);
        if !counted.contains_key(local) {
            counted.insert(local.to_path_buf(), 0);
            self.metrics.increment(BYTES_TO_DOWNLOAD, size);
        }
    }

    /// Count up to `len` freshly written bytes, never more than `size` per path
    fn count(&self, local: &Path, len: u64, size: u64) {
        let mut counted = self.counted.lock().unwrap_or_else(PoisonError::into_inner);
        let done = counted.entry(local.to_path_buf()).or_insert(0);
        let delta = len.min(size.saturating_sub(*done));
        if delta > 0 {
            *done += delta;
            self.metrics.increment(BYTES_DOWNLOADED, delta);
        }
    }

    async fn transfer(&self, download: &Download, local: &Path) -> Result<u64> {
        self.schedule(local, download.size);

        if let Some(parent) = local.parent() {
            ensure_dir(parent).await?;
        }

        let mut response = self.http.get(&download.url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::UnexpectedStatus {
                url: download.url.clone(),
                status: status.as_u16(),
            });
        }

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(local)
            .await?;

        let mut written: u64 = 0;
        while let Some(bytes) = response.chunk().await? {
            for slice in bytes.chunks(CHUNK_SIZE) {
                file.write_all(slice).await?;
                written += slice.len() as u64;
                self.count(local, slice.len() as u64, download.size);
            }
        }
        file.flush().await?;

        if written != download.size {
            tracing::warn!(
                url = %download.url,
                path = %local.display(),
                declared = download.size,
                written,
                "transferred size differs from declared size"
            );
        }
        Ok(written)
    }
}

#[async_trait::async_trait]
impl TaskExecutor for DownloadExecutor {
    type Payload = Download;

    async fn execute(&self, download: &Download) -> Result<ExecutionOutcome> {
        let local = self.resolve_path(download)?;

        if checksum::matches_on_disk(&local, &download.md5).await? {
            tracing::info!(path = %local.display(), "file already correct, skipping");
            return Ok(ExecutionOutcome::Skipped);
        }

        tracing::info!(
            url = %download.url,
            path = %local.display(),
            size = download.size,
            "downloading"
        );
        let bytes = self.transfer(download, &local).await?;
        tracing::info!(path = %local.display(), bytes, "download finished");

        Ok(ExecutionOutcome::Transferred { bytes })
    }

    fn describe(&self, download: &Download) -> String {
        download.url.clone()
    }
}

/// Create `dir` and its parents; losing a creation race to another worker is fine
async fn ensure_dir(dir: &Path) -> Result<()> {
    match tokio::fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && dir.is_dir() => Ok(()),
        Err(e) => Err(e.into()),
    }
}
