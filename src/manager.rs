//! One job run: a download pool, its metrics and an optional reporter

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::config::Config;
use crate::download::DownloadExecutor;
use crate::error::{Error, Result};
use crate::metrics::MetricStore;
use crate::paths::PathRewrite;
use crate::reporter::Reporter;
use crate::retry::RetryPolicy;
use crate::types::{Download, DownloadId, JobOutcome, TaskId};
use crate::worker::{DrainStatus, WorkerPool};

/// Reporter settings for a job run
#[derive(Clone)]
pub struct ReportTarget {
    /// Client used to post status updates
    pub api: ApiClient,
    /// Job the updates are about
    pub download_id: DownloadId,
}

/// Owns the worker pool, metrics and reporter of exactly one job
///
/// `join` returns only once every submitted task is terminal (or the run was
/// cancelled, in which case the stragglers are reported as cancelled). The
/// reporter keeps running until then, including while tasks back off between retries.
pub struct JobManager {
    pool: WorkerPool<DownloadExecutor>,
    metrics: Arc<MetricStore>,
    reporter: Mutex<Option<Reporter>>,
    closed: AtomicBool,
}

impl JobManager {
    /// Start a job run
    ///
    /// Spawns `config.worker.thread_count` workers and, when `report` is given,
    /// a reporter posting every `config.poll.report_interval`.
    pub fn new(
        config: &Config,
        rewrite: Option<PathRewrite>,
        report: Option<ReportTarget>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        let metrics = Arc::new(MetricStore::new());
        let executor = Arc::new(DownloadExecutor::new(Arc::clone(&metrics), rewrite)?);
        let pool = WorkerPool::new(
            executor,
            config.worker.thread_count,
            RetryPolicy::from(&config.retry),
            cancel.clone(),
        );
        let reporter = report.map(|target| {
            Reporter::spawn(
                target.api,
                target.download_id,
                Arc::clone(&metrics),
                config.poll.report_interval,
                cancel,
            )
        });

        Ok(Self {
            pool,
            metrics,
            reporter: Mutex::new(reporter),
            closed: AtomicBool::new(false),
        })
    }

    /// Progress counters of this run
    pub fn metrics(&self) -> &Arc<MetricStore> {
        &self.metrics
    }

    /// Queue a download
    ///
    /// Fails with [`Error::JobClosed`] once [`JobManager::join`] has begun and
    /// with [`Error::Cancelled`] after cancellation.
    pub fn add_task(&self, download: Download) -> Result<TaskId> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::JobClosed);
        }
        let id = self.pool.submit(download)?;
        tracing::debug!(task_id = %id, "task queued");
        Ok(id)
    }

    /// Wait for the job to finish and aggregate its outcome
    ///
    /// Closes the job to new tasks, waits for the pool to drain (or for
    /// cancellation), then stops the workers and the reporter.
    pub async fn join(&self) -> JobOutcome {
        self.closed.store(true, Ordering::SeqCst);

        let drained = self.pool.drain_and_wait().await;
        if drained == DrainStatus::Cancelled {
            tracing::info!("job cancelled, waiting for in-flight transfers to finish");
        }

        let outcome = self.pool.shutdown().await;

        if let Some(reporter) = self.reporter.lock().await.take() {
            reporter.stop().await;
        }

        let snapshot = self.metrics.snapshot();
        tracing::debug!(
            bytes_downloaded = snapshot.bytes_downloaded,
            bytes_to_download = snapshot.bytes_to_download,
            "job metrics"
        );
        outcome
    }
}
