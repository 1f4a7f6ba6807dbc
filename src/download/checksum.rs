//! MD5 digests in the base64 form the render-farm service publishes.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use std::path::Path;
use tokio::io::AsyncReadExt;

use crate::error::Result;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Base64 (standard alphabet, padded) encoding of the MD5 digest of `data`
pub fn md5_base64(data: &[u8]) -> String {
    STANDARD.encode(md5::compute(data).0)
}

/// Base64-encoded MD5 digest of the file at `path`, streamed from disk
pub async fn file_md5_base64(path: &Path) -> Result<String> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut context = md5::Context::new();
    let mut buffer = vec![0u8; READ_BUFFER_SIZE];
    loop {
        let read = file.read(&mut buffer).await?;
        if read == 0 {
            break;
        }
        context.consume(&buffer[..read]);
    }
    Ok(STANDARD.encode(context.compute().0))
}

/// Whether a file exists at `path` and its digest equals `expected`
///
/// A missing file is not an error; any other I/O failure is.
pub async fn matches_on_disk(path: &Path, expected: &str) -> Result<bool> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(file_md5_base64(path).await? == expected),
        Ok(_) => Ok(false),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e.into()),
    }
}
