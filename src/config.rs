//! Configuration types for renderfarm-dl

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Connection settings for the render-farm service
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL of the service (default: "http://localhost:8080/")
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API key sent as a bearer token (None = unauthenticated)
    #[serde(default)]
    pub api_key: Option<String>,

    /// Timeout for service calls (default: 30 seconds)
    ///
    /// Only applies to the polling and status endpoints. File transfers are
    /// not bounded by a total timeout since large outputs can legitimately take hours.
    #[serde(default = "default_api_timeout", with = "duration_serde")]
    pub timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key: None,
            timeout: default_api_timeout(),
        }
    }
}

/// Worker pool settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent download workers per job (default: 5)
    #[serde(default = "default_thread_count")]
    pub thread_count: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            thread_count: default_thread_count(),
        }
    }
}

/// Polling and progress-reporting settings
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PollConfig {
    /// Idle sleep between unsuccessful polls (default: 15 seconds)
    #[serde(default = "default_nap_interval", with = "duration_serde")]
    pub nap_interval: Duration,

    /// Interval between progress reports while a job runs (default: 10 seconds)
    #[serde(default = "default_report_interval", with = "duration_serde")]
    pub report_interval: Duration,

    /// Site/region tag used to scope which jobs are offered (None = any)
    #[serde(default)]
    pub location: Option<String>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            nap_interval: default_nap_interval(),
            report_interval: default_report_interval(),
            location: None,
        }
    }
}

/// Retry configuration for transient transfer failures
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total number of execution attempts per task, first try included (default: 5)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Delay before the first retry (default: 1 second)
    #[serde(default = "default_initial_delay", with = "duration_serde")]
    pub initial_delay: Duration,

    /// Maximum delay between retries (default: 60 seconds)
    #[serde(default = "default_max_delay", with = "duration_serde")]
    pub max_delay: Duration,

    /// Multiplier for exponential backoff (default: 2.0)
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,

    /// Add random jitter to delays (default: true)
    #[serde(default = "default_true")]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay: default_initial_delay(),
            max_delay: default_max_delay(),
            backoff_multiplier: default_backoff_multiplier(),
            jitter: true,
        }
    }
}

/// Main configuration for the download agent
///
/// Every field has a default, so an empty JSON object is a valid config file.
/// Command-line flags are layered on top by the binary.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Config {
    /// Render-farm service connection
    #[serde(default)]
    pub api: ApiConfig,

    /// Worker pool sizing
    #[serde(default)]
    pub worker: WorkerConfig,

    /// Polling cadence and location scope
    #[serde(default)]
    pub poll: PollConfig,

    /// Retry policy for individual downloads
    #[serde(default)]
    pub retry: RetryConfig,

    /// Local root that replaces each job's destination prefix (None = write to the declared paths)
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl Config {
    /// Load a configuration from a JSON file
    ///
    /// Missing fields fall back to their defaults. The loaded config is validated
    /// before it is returned.
    pub fn from_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file '{}': {}", path.display(), e),
            key: None,
        })?;
        let config: Config = serde_json::from_str(&raw).map_err(|e| Error::Config {
            message: format!("failed to parse config file '{}': {}", path.display(), e),
            key: None,
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Check the settings that would otherwise fail at runtime
    pub fn validate(&self) -> Result<()> {
        if self.worker.thread_count == 0 {
            return Err(Error::config(
                "worker.thread_count",
                "at least one worker is required",
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(Error::config(
                "retry.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.retry.backoff_multiplier < 1.0 {
            return Err(Error::config(
                "retry.backoff_multiplier",
                "backoff multiplier must be >= 1.0",
            ));
        }
        if self.poll.report_interval.is_zero() {
            return Err(Error::config(
                "poll.report_interval",
                "report interval must be greater than zero",
            ));
        }
        self.base_url()?;
        Ok(())
    }

    /// Parsed service base URL
    ///
    /// A trailing slash is added when missing so that endpoint paths join under it.
    pub fn base_url(&self) -> Result<Url> {
        let mut raw = self.api.base_url.clone();
        if !raw.ends_with('/') {
            raw.push('/');
        }
        Url::parse(&raw).map_err(|e| {
            Error::config(
                "api.base_url",
                format!("invalid base URL '{}': {}", self.api.base_url, e),
            )
        })
    }
}

fn default_base_url() -> String {
    "http://localhost:8080/".to_string()
}

fn default_api_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_thread_count() -> usize {
    5
}

fn default_nap_interval() -> Duration {
    Duration::from_secs(15)
}

fn default_report_interval() -> Duration {
    Duration::from_secs(10)
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

fn default_backoff_multiplier() -> f64 {
    2.0
}

fn default_true() -> bool {
    true
}

// Duration serialization helper
mod duration_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_secs())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}
