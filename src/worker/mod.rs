//! Generic bounded worker pool.
//!
//! - [`TaskExecutor`] - capability interface implemented once per task kind
//! - [`pool`] - the [`WorkerPool`] itself: queue, workers, retry boundary
//! - [`ledger`] - per-task state tracking and outcome aggregation

mod ledger;
mod pool;

pub use pool::{DrainStatus, WorkerPool};

use crate::error::Result;
use crate::types::{ExecutionOutcome, TaskId};

/// Executes one kind of task
///
/// Implementations do the work for a single payload and report failure by
/// returning an error; retries, backoff and failure isolation are the pool's job.
#[async_trait::async_trait]
pub trait TaskExecutor: Send + Sync + 'static {
    /// The payload a task of this kind carries
    type Payload: Send + Sync + 'static;

    /// Run one attempt for `payload`
    async fn execute(&self, payload: &Self::Payload) -> Result<ExecutionOutcome>;

    /// Short human-readable description of `payload` used in logs and failure reports
    fn describe(&self, payload: &Self::Payload) -> String;
}

/// Queue entry: one payload plus its retry state
#[derive(Debug)]
pub(crate) struct Task<P> {
    pub(crate) id: TaskId,
    pub(crate) payload: P,
    /// Attempts started so far
    pub(crate) attempts: u32,
}
