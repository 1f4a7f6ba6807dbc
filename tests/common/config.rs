//! Test configuration helpers

use renderfarm_dl::Config;
use std::path::Path;
use std::time::Duration;

/// Configuration pointing at `base_url` with local output under `output`
///
/// Retries and naps are shortened so tests finish quickly.
pub fn test_config(base_url: &str, output: &Path) -> Config {
    let mut config = Config::default();
    config.api.base_url = base_url.to_string();
    config.api.timeout = Duration::from_secs(5);
    config.worker.thread_count = 3;
    config.poll.nap_interval = Duration::from_millis(50);
    config.poll.report_interval = Duration::from_millis(25);
    config.retry.max_attempts = 3;
    config.retry.initial_delay = Duration::from_millis(5);
    config.retry.max_delay = Duration::from_millis(20);
    config.retry.jitter = false;
    config.output = Some(output.to_path_buf());
    config
}
