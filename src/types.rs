//! Core types for renderfarm-dl
//!
//! Wire types mirror the JSON exchanged with the render-farm service; the rest
//! describe the lifecycle of tasks inside one job run.

use serde::{Deserialize, Deserializer, Serialize};

/// Identifier the service assigns to a download job
///
/// The service may send it as a JSON number or a string; it is echoed back in
/// status updates in the same form it arrived.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DownloadId {
    /// Numeric identifier
    Number(i64),
    /// Textual identifier
    Text(String),
}

impl std::fmt::Display for DownloadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DownloadId::Number(n) => write!(f, "{n}"),
            DownloadId::Text(s) => f.write_str(s),
        }
    }
}

impl From<i64> for DownloadId {
    fn from(id: i64) -> Self {
        DownloadId::Number(id)
    }
}

impl From<&str> for DownloadId {
    fn from(id: &str) -> Self {
        DownloadId::Text(id.to_string())
    }
}

/// A single remote file to fetch
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Download {
    /// Where to fetch the content from
    pub url: String,
    /// Destination path as declared by the service (may use a drive letter and backslashes)
    pub path: String,
    /// Base64-encoded MD5 digest of the expected content
    pub md5: String,
    /// Declared size in bytes
    #[serde(deserialize_with = "size_from_number_or_string")]
    pub size: u64,
}

/// One unit of work fetched from the remote queue
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Service-side download job identifier, used for status reports
    pub download_id: DownloadId,
    /// Destination root all download paths are declared under
    #[serde(rename = "destination")]
    pub destination_root: String,
    /// Files to transfer
    #[serde(default)]
    pub downloads: Vec<Download>,
    /// Render job the downloads belong to, when the service includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_id: Option<String>,
    /// Location tag the job was offered under, when the service includes it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
}

/// Progress report posted to `/downloads/status`
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StatusUpdate {
    /// Job being reported on
    pub download_id: DownloadId,
    /// Always "downloading" while a job runs
    pub status: String,
    /// Bytes written to disk so far
    pub bytes_downloaded: u64,
    /// Bytes scheduled for transfer so far
    pub bytes_to_download: u64,
}

impl StatusUpdate {
    /// Build a "downloading" status update
    pub fn downloading(download_id: DownloadId, bytes_downloaded: u64, bytes_to_download: u64) -> Self {
        Self {
            download_id,
            status: "downloading".to_string(),
            bytes_downloaded,
            bytes_to_download,
        }
    }
}

/// Identifier of a task within one job run (submission order, starting at 0)
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a task
///
/// `Pending → Running → {Done | Retrying → Pending | Failed}`; a task still
/// queued or backing off when the job is cancelled ends as `Cancelled`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting in the queue
    Pending,
    /// Being executed by a worker
    Running,
    /// Backing off before being re-enqueued
    Retrying,
    /// Finished successfully
    Done,
    /// Permanently failed after exhausting retries
    Failed,
    /// Dropped by cancellation before reaching another terminal state
    Cancelled,
}

impl TaskState {
    /// Whether the task will not change state again
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskState::Done | TaskState::Failed | TaskState::Cancelled)
    }
}

/// Successful result of one executor run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The content was transferred
    Transferred {
        /// Bytes written to disk
        bytes: u64,
    },
    /// Nothing to do: the local copy already matched
    Skipped,
}

/// A task that reached the `Failed` state
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct FailedTask {
    /// Task identifier
    pub id: TaskId,
    /// Short description of the payload (the download URL)
    pub label: String,
    /// Number of attempts made
    pub attempts: u32,
    /// Display form of the last error
    pub error: String,
}

/// Aggregate result of one job run
///
/// Every submitted task is counted in exactly one of `transferred`, `skipped`,
/// `failed` or `cancelled`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct JobOutcome {
    /// Number of tasks submitted
    pub total: usize,
    /// Tasks whose content was transferred
    pub transferred: usize,
    /// Tasks skipped because the local file was already correct
    pub skipped: usize,
    /// Permanently failed tasks
    pub failed: Vec<FailedTask>,
    /// Tasks dropped by cancellation
    pub cancelled: Vec<TaskId>,
}

impl JobOutcome {
    /// True iff every task reached `Done`
    pub fn is_success(&self) -> bool {
        self.failed.is_empty() && self.cancelled.is_empty() && self.transferred + self.skipped == self.total
    }
}

/// Accept a size encoded either as a JSON number or a numeric string
fn size_from_number_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawSize {
        Number(u64),
        Text(String),
    }

    match RawSize::deserialize(deserializer)? {
        RawSize::Number(n) => Ok(n),
        RawSize::Text(s) => s
            .trim()
            .parse::<u64>()
            .map_err(|e| serde::de::Error::custom(format!("invalid size '{s}': {e}"))),
    }
}
