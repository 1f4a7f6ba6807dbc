//! # renderfarm-dl
//!
//! Download agent for a render-farm service: polls the service for finished
//! jobs, fetches their output files to local storage with an MD5 integrity
//! check, and posts progress back while it works.
//!
//! ## Building blocks
//!
//! - [`WorkerPool`] runs tasks on a bounded set of workers with retry and
//!   failure isolation, through any [`TaskExecutor`]
//! - [`DownloadExecutor`] is the executor that verifies or transfers one file
//! - [`MetricStore`] holds the shared progress counters of a job run
//! - [`Reporter`] posts those counters to the service at a fixed interval
//! - [`JobManager`] ties a pool, its metrics and a reporter to one job
//! - [`Driver`] is the polling loop, daemon or single-job
//!
//! ## Quick Start
//!
//! ```no_run
//! use renderfarm_dl::{Config, Driver, RunMode, cancel_on_signal};
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut config = Config::default();
//!     config.poll.location = Some("london".to_string());
//!
//!     let cancel = CancellationToken::new();
//!     cancel_on_signal(cancel.clone());
//!
//!     let driver = Driver::new(config, cancel)?;
//!     driver.run(RunMode::Daemon).await?;
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// HTTP client for the render-farm service
pub mod api;
/// Configuration types
pub mod config;
/// File download executor and integrity checks
pub mod download;
/// Polling control loop
pub mod driver;
/// Error types
pub mod error;
/// Job run orchestration
pub mod manager;
/// Shared progress counters
pub mod metrics;
/// Path normalization and destination-root substitution
pub mod paths;
/// Progress reporting
pub mod reporter;
/// Retry logic with exponential backoff
pub mod retry;
/// Core types
pub mod types;
/// Bounded worker pool
pub mod worker;

// Re-export commonly used types
pub use api::ApiClient;
pub use config::Config;
pub use download::DownloadExecutor;
pub use driver::{Driver, RunMode};
pub use error::{Error, Result};
pub use manager::{JobManager, ReportTarget};
pub use metrics::{MetricSnapshot, MetricStore};
pub use reporter::Reporter;
pub use retry::{IsRetryable, RetryDecision, RetryPolicy};
pub use types::{Download, DownloadId, ExecutionOutcome, Job, JobOutcome, StatusUpdate, TaskId};
pub use worker::{DrainStatus, TaskExecutor, WorkerPool};

use tokio_util::sync::CancellationToken;

/// Cancel `token` when the process receives a termination signal
///
/// Spawns a background task; must be called from within a tokio runtime.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
pub fn cancel_on_signal(token: CancellationToken) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                tracing::info!("shutting down, waiting for in-flight transfers");
                token.cancel();
            }
            _ = token.cancelled() => {}
        }
    });
}

/// Wait for SIGTERM/SIGINT (Ctrl+C on other platforms)
#[cfg(unix)]
pub async fn shutdown_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Set up signal handlers - these may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), _) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            if let Ok(mut sigint) = signal(SignalKind::interrupt()) {
                sigint.recv().await;
                tracing::info!("Received SIGINT signal (Ctrl+C)");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
        (_, Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            if let Ok(mut sigterm) = signal(SignalKind::terminate()) {
                sigterm.recv().await;
                tracing::info!("Received SIGTERM signal");
            } else {
                tracing::error!("Could not register any signal handlers, using ctrl_c fallback");
                tokio::signal::ctrl_c().await.ok();
            }
        }
    }
}

/// Wait for Ctrl+C
#[cfg(not(unix))]
pub async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
