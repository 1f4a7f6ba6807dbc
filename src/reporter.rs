//! Periodic progress reports for a running job
//!
//! The reporter is a background task bound to one job run. It posts a
//! snapshot of the job's [`MetricStore`] every `interval`, first report
//! immediately. Failed posts are logged and the loop carries on: reporting is
//! best-effort and never holds up the workers.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::metrics::MetricStore;
use crate::types::{DownloadId, StatusUpdate};

/// Handle to a running report loop
pub struct Reporter {
    stop: CancellationToken,
    handle: JoinHandle<()>,
}

impl Reporter {
    /// Start reporting progress of `download_id`
    ///
    /// The loop ends when [`Reporter::stop`] is called or `cancel` fires.
    pub fn spawn(
        api: ApiClient,
        download_id: DownloadId,
        metrics: Arc<MetricStore>,
        interval: Duration,
        cancel: &CancellationToken,
    ) -> Self {
        let stop = cancel.child_token();
        let handle = tokio::spawn(report_loop(api, download_id, metrics, interval, stop.clone()));
        Self { stop, handle }
    }

    /// Signal the loop to stop and wait for it to exit
    pub async fn stop(self) {
        self.stop.cancel();
        if let Err(e) = self.handle.await {
            tracing::error!(error = %e, "reporter task terminated abnormally");
        }
    }
}

async fn report_loop(
    api: ApiClient,
    download_id: DownloadId,
    metrics: Arc<MetricStore>,
    interval: Duration,
    stop: CancellationToken,
) {
    tracing::debug!(download_id = %download_id, interval_secs = interval.as_secs(), "reporter started");

    loop {
        let snapshot = metrics.snapshot();
        let update = StatusUpdate::downloading(
            download_id.clone(),
            snapshot.bytes_downloaded,
            snapshot.bytes_to_download,
        );

        // A post in flight is abandoned when the job ends
        tokio::select! {
            _ = stop.cancelled() => break,
            result = api.post_status(&update) => match result {
                Ok(status) if !status.is_success() => {
                    tracing::warn!(
                        download_id = %download_id,
                        status = status.as_u16(),
                        "status update rejected"
                    );
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(download_id = %download_id, error = %e, "failed to post status update");
                }
            },
        }

        tokio::select! {
            _ = stop.cancelled() => break,
            _ = tokio::time::sleep(interval) => {}
        }
    }

    tracing::debug!(download_id = %download_id, "reporter stopped");
}
