//! Polling control loop
//!
//! The [`Driver`] asks the render-farm service for work, runs each job it gets
//! through a [`JobManager`] and, in daemon mode, keeps doing so until the
//! cancellation token fires. Every iteration is followed by a nap, whether it
//! ran a job, found nothing or failed. Errors and panics inside one iteration
//! are logged; they never end the loop.

use std::panic::AssertUnwindSafe;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;

use crate::api::ApiClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::manager::{JobManager, ReportTarget};
use crate::paths::PathRewrite;
use crate::types::{DownloadId, Job, JobOutcome};

/// What the driver does once started
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RunMode {
    /// Poll `downloads/next` forever
    Daemon,
    /// Fetch and run the download job of one render job, then return
    SingleJob {
        /// Render job to download
        job_id: String,
        /// Restrict the download to one task of the job
        task_id: Option<String>,
    },
}

/// Polls the service and runs the jobs it hands out
pub struct Driver {
    config: Config,
    api: ApiClient,
    cancel: CancellationToken,
}

impl Driver {
    /// Build a driver; `cancel` ends the loop and every job it starts
    pub fn new(config: Config, cancel: CancellationToken) -> Result<Self> {
        let api = ApiClient::new(&config)?;
        Ok(Self {
            config,
            api,
            cancel,
        })
    }

    /// Run in the given mode
    ///
    /// Daemon mode only returns once cancelled. Single-job mode returns the
    /// outcome of the job, or `None` if the service had no job to hand out.
    pub async fn run(&self, mode: RunMode) -> Result<Option<JobOutcome>> {
        match mode {
            RunMode::Daemon => {
                self.run_daemon().await;
                Ok(None)
            }
            RunMode::SingleJob { job_id, task_id } => {
                self.run_single(&job_id, task_id.as_deref()).await
            }
        }
    }

    /// Poll once for a job
    ///
    /// With a `job_id`, asks for that job (optionally narrowed to `task_id`);
    /// otherwise asks for the next available job. A `task_id` without a
    /// `job_id` is a configuration error and no request is made.
    pub async fn poll(&self, job_id: Option<&str>, task_id: Option<&str>) -> Result<Option<Job>> {
        let location = self.config.poll.location.as_deref();
        match (job_id, task_id) {
            (None, Some(_)) => Err(Error::config(
                "task_id",
                "a task id can only be given together with a job id",
            )),
            (Some(job_id), task_id) => self.api.download_for_job(job_id, task_id, location).await,
            (None, None) => self.api.next_download(location).await,
        }
    }

    async fn run_single(&self, job_id: &str, task_id: Option<&str>) -> Result<Option<JobOutcome>> {
        let job = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            job = self.poll(Some(job_id), task_id) => job?,
        };
        match job {
            Some(job) => Ok(Some(self.run_job(job, false).await?)),
            None => {
                tracing::info!(job_id, task_id, "no download available for job");
                Ok(None)
            }
        }
    }

    async fn run_daemon(&self) {
        tracing::info!(
            location = self.config.poll.location.as_deref(),
            nap_secs = self.config.poll.nap_interval.as_secs(),
            "download daemon started"
        );

        while !self.cancel.is_cancelled() {
            match AssertUnwindSafe(self.iteration()).catch_unwind().await {
                Ok(Ok(())) => {}
                Ok(Err(Error::Cancelled)) => break,
                Ok(Err(e)) => {
                    tracing::error!(error = %e.chain(), "download loop iteration failed");
                }
                Err(panic) => {
                    tracing::error!(panic = ?panic_text(panic.as_ref()), "download loop iteration panicked");
                }
            }

            // The service may hand out the same job again; never re-poll without a pause
            if !self.nap().await {
                break;
            }
        }

        tracing::info!("download daemon stopped");
    }

    async fn iteration(&self) -> Result<()> {
        let job = tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            job = self.poll(None, None) => job?,
        };
        match job {
            Some(job) => {
                self.run_job(job, true).await?;
            }
            None => tracing::debug!("no download available"),
        }
        Ok(())
    }

    /// Sleep for the nap interval; returns false if woken by cancellation
    async fn nap(&self) -> bool {
        tracing::debug!(secs = self.config.poll.nap_interval.as_secs(), "napping");
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.poll.nap_interval) => true,
        }
    }

    /// Run every download of `job` to completion
    ///
    /// `report` attaches a reporter posting progress for the job's `download_id`.
    pub async fn run_job(&self, mut job: Job, report: bool) -> Result<JobOutcome> {
        let rewrite = match &self.config.output {
            Some(root) => Some(PathRewrite::new(&job.destination_root, root.clone())?),
            None => None,
        };
        let target = report.then(|| ReportTarget {
            api: self.api.clone(),
            download_id: job.download_id.clone(),
        });

        let manager = JobManager::new(&self.config, rewrite, target, &self.cancel)?;
        for download in std::mem::take(&mut job.downloads) {
            if let Err(e) = manager.add_task(download) {
                tracing::warn!(download_id = %job.download_id, error = %e, "stopped queueing downloads");
                break;
            }
        }

        let outcome = manager.join().await;
        log_outcome(&job.download_id, &outcome);
        Ok(outcome)
    }
}

fn log_outcome(download_id: &DownloadId, outcome: &JobOutcome) {
    if outcome.is_success() {
        tracing::info!(
            download_id = %download_id,
            transferred = outcome.transferred,
            skipped = outcome.skipped,
            "job completed"
        );
        return;
    }

    for failed in &outcome.failed {
        tracing::error!(
            download_id = %download_id,
            url = %failed.label,
            attempts = failed.attempts,
            error = %failed.error,
            "download failed"
        );
    }
    tracing::error!(
        download_id = %download_id,
        total = outcome.total,
        transferred = outcome.transferred,
        skipped = outcome.skipped,
        failed = outcome.failed.len(),
        cancelled = outcome.cancelled.len(),
        "job did not complete"
    );
}

fn panic_text(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic payload")
}
