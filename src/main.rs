//! # renderfarm-dl
//!
//! Command-line entry point: assembles the configuration from a JSON file,
//! the environment and flags, installs logging and signal handling, then runs
//! the download driver in daemon or single-job mode.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use renderfarm_dl::{Config, Driver, Result, RunMode, cancel_on_signal};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Exit status after a cancellation signal, as for SIGINT
const EXIT_INTERRUPTED: u8 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about = "Render-farm download agent", long_about = None)]
struct Cli {
    /// JSON configuration file; flags override its values
    #[arg(short, long, env = "RENDERFARM_DL_CONFIG")]
    config: Option<PathBuf>,
    /// Base URL of the render-farm service
    #[arg(long, env = "RENDERFARM_DL_BASE_URL")]
    base_url: Option<String>,
    /// API key sent as a bearer token
    #[arg(long, env = "RENDERFARM_DL_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
    /// Number of concurrent download workers
    #[arg(short = 't', long)]
    thread_count: Option<usize>,
    /// Seconds to wait between polls when no job is available
    #[arg(long)]
    nap_secs: Option<u64>,
    /// Only take jobs offered for this location
    #[arg(short, long, env = "RENDERFARM_DL_LOCATION")]
    location: Option<String>,
    /// Local root replacing each job's destination directory
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Download one job and exit instead of polling
    #[arg(short, long)]
    job_id: Option<String>,
    /// Restrict the job download to one task
    #[arg(long, requires = "job_id")]
    task_id: Option<String>,
    /// Log level used when RUST_LOG is not set
    #[arg(long, default_value_t = Level::INFO)]
    log_level: Level,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let mut config = match &self.config {
            Some(path) => Config::from_file(path)?,
            None => Config::default(),
        };

        if let Some(base_url) = &self.base_url {
            config.api.base_url = base_url.clone();
        }
        if let Some(api_key) = &self.api_key {
            config.api.api_key = Some(api_key.clone());
        }
        if let Some(thread_count) = self.thread_count {
            config.worker.thread_count = thread_count;
        }
        if let Some(nap_secs) = self.nap_secs {
            config.poll.nap_interval = std::time::Duration::from_secs(nap_secs);
        }
        if let Some(location) = &self.location {
            config.poll.location = Some(location.clone());
        }
        if let Some(output) = &self.output {
            config.output = Some(output.clone());
        }

        config.validate()?;
        Ok(config)
    }

    fn mode(&self) -> RunMode {
        match &self.job_id {
            Some(job_id) => RunMode::SingleJob {
                job_id: job_id.clone(),
                task_id: self.task_id.clone(),
            },
            None => RunMode::Daemon,
        }
    }
}

fn init_logging(level: Level) {
    let filter = EnvFilter::builder()
        .with_default_directive(level.into())
        .from_env_lossy();

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).compact())
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    let config = match cli.config() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e.chain(), "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    let driver = match Driver::new(config, cancel.clone()) {
        Ok(driver) => driver,
        Err(e) => {
            tracing::error!(error = %e.chain(), "failed to start");
            return ExitCode::FAILURE;
        }
    };

    match driver.run(cli.mode()).await {
        Ok(Some(outcome)) if !outcome.is_success() => {
            tracing::warn!(failed = outcome.failed.len(), "job finished with failures");
        }
        Ok(_) => {}
        Err(e) if !cancel.is_cancelled() => {
            tracing::error!(error = %e.chain(), "download run failed");
        }
        Err(_) => {}
    }

    if cancel.is_cancelled() {
        ExitCode::from(EXIT_INTERRUPTED)
    } else {
        ExitCode::SUCCESS
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn task_id_requires_job_id() {
        let result = Cli::try_parse_from(["renderfarm-dl", "--task-id", "003"]);

        assert!(result.is_err());
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from([
            "renderfarm-dl",
            "--thread-count",
            "8",
            "--nap-secs",
            "3",
            "--location",
            "london",
            "--job-id",
            "5512",
            "--task-id",
            "003",
        ])
        .unwrap();

        let config = cli.config().unwrap();

        assert_eq!(config.worker.thread_count, 8);
        assert_eq!(config.poll.nap_interval, std::time::Duration::from_secs(3));
        assert_eq!(config.poll.location.as_deref(), Some("london"));
        assert_eq!(
            cli.mode(),
            RunMode::SingleJob {
                job_id: "5512".into(),
                task_id: Some("003".into())
            }
        );
    }

    #[test]
    fn zero_threads_fails_validation() {
        let cli = Cli::try_parse_from(["renderfarm-dl", "--thread-count", "0"]).unwrap();

        assert!(cli.config().is_err());
    }
}
