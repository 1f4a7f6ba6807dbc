//! Custom test assertions for integration tests

use renderfarm_dl::download::checksum::file_md5_base64;
use std::path::Path;
use std::time::Duration;

/// Assert the file at `path` hashes to `md5`
pub async fn assert_file_digest(path: &Path, md5: &str) {
    let actual = file_md5_base64(path)
        .await
        .unwrap_or_else(|e| panic!("cannot hash {}: {e}", path.display()));
    assert_eq!(actual, md5, "digest mismatch for {}", path.display());
}

/// Poll `condition` every 10ms until it holds; false on timeout
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Assert every status update satisfies `bytes_downloaded <= bytes_to_download`
pub fn assert_progress_bounded(updates: &[serde_json::Value]) {
    for update in updates {
        let downloaded = update["bytes_downloaded"].as_u64().unwrap_or_default();
        let scheduled = update["bytes_to_download"].as_u64().unwrap_or_default();
        assert!(
            downloaded <= scheduled,
            "status update reports more downloaded than scheduled: {update}"
        );
        assert_eq!(update["status"], "downloading");
    }
}
