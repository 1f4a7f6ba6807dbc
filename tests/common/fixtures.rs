//! Mock render-farm service and job fixtures

use renderfarm_dl::Download;
use renderfarm_dl::download::checksum::md5_base64;
use serde_json::{Value, json};
use std::time::Duration;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Destination root jobs declare; rewritten to a temp dir via `output`
pub const DESTINATION: &str = "/out";

/// One file of a render job
#[derive(Clone, Debug)]
pub struct RenderFile {
    /// Path relative to the destination root, `/`-separated
    pub relative: String,
    /// Content served by the file host
    pub content: Vec<u8>,
}

impl RenderFile {
    /// File with deterministic pseudo-random content of `len` bytes
    pub fn new(relative: &str, seed: u8, len: usize) -> Self {
        Self {
            relative: relative.to_string(),
            content: render_content(seed, len),
        }
    }

    /// Base64 MD5 of the content
    pub fn md5(&self) -> String {
        md5_base64(&self.content)
    }
}

/// Deterministic content that differs per seed
pub fn render_content(seed: u8, len: usize) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

/// Wiremock stand-in for both the render-farm API and its file host
pub struct FarmService {
    /// Underlying mock server
    pub server: MockServer,
}

impl FarmService {
    /// Start a service that acknowledges status posts and has no jobs
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/downloads/status"))
            .respond_with(ResponseTemplate::new(201))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/downloads/next"))
            .respond_with(ResponseTemplate::new(204))
            .with_priority(10)
            .mount(&server)
            .await;
        Self { server }
    }

    /// Base URL of the service
    pub fn uri(&self) -> String {
        self.server.uri()
    }

    /// URL a file is served at
    pub fn file_url(&self, file: &RenderFile) -> String {
        format!("{}/files/{}", self.uri(), file.relative)
    }

    /// Serve `file` from the file host
    pub async fn serve(&self, file: &RenderFile) {
        self.serve_with_delay(file, Duration::ZERO).await;
    }

    /// Serve `file`, answering each request after `delay`
    pub async fn serve_with_delay(&self, file: &RenderFile, delay: Duration) {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}", file.relative)))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_bytes(file.content.clone())
                    .set_delay(delay),
            )
            .mount(&self.server)
            .await;
    }

    /// Answer the first `failures` requests for `file` with 503, then serve it
    pub async fn serve_flaky(&self, file: &RenderFile, failures: u64) {
        if failures > 0 {
            Mock::given(method("GET"))
                .and(path(format!("/files/{}", file.relative)))
                .respond_with(ResponseTemplate::new(503))
                .up_to_n_times(failures)
                .with_priority(1)
                .mount(&self.server)
                .await;
        }
        self.serve(file).await;
    }

    /// Answer every request for `file` with 404
    pub async fn serve_missing(&self, file: &RenderFile) {
        Mock::given(method("GET"))
            .and(path(format!("/files/{}", file.relative)))
            .respond_with(ResponseTemplate::new(404))
            .mount(&self.server)
            .await;
    }

    /// Download entry for `file` under [`DESTINATION`]
    pub fn download_of(&self, file: &RenderFile) -> Download {
        Download {
            url: self.file_url(file),
            path: format!("{DESTINATION}/{}", file.relative),
            md5: file.md5(),
            size: file.content.len() as u64,
        }
    }

    /// Job body listing `files` under [`DESTINATION`]
    pub fn job_body(&self, download_id: i64, files: &[RenderFile]) -> Value {
        let downloads: Vec<Value> = files
            .iter()
            .map(|f| {
                json!({
                    "url": self.file_url(f),
                    "path": format!("{DESTINATION}/{}", f.relative),
                    "md5": f.md5(),
                    "size": f.content.len(),
                })
            })
            .collect();
        json!({
            "download_id": download_id,
            "destination": DESTINATION,
            "downloads": downloads,
        })
    }

    /// Offer a job once on `downloads/next`; later polls find nothing
    pub async fn offer_next_once(&self, download_id: i64, files: &[RenderFile]) {
        Mock::given(method("POST"))
            .and(path("/downloads/next"))
            .respond_with(ResponseTemplate::new(201).set_body_json(self.job_body(download_id, files)))
            .up_to_n_times(1)
            .with_priority(1)
            .mount(&self.server)
            .await;
    }

    /// Offer a job on `downloads/{job_id}` for every request
    pub async fn offer_job(&self, job_id: &str, download_id: i64, files: &[RenderFile]) {
        Mock::given(method("POST"))
            .and(path(format!("/downloads/{job_id}")))
            .respond_with(ResponseTemplate::new(201).set_body_json(self.job_body(download_id, files)))
            .mount(&self.server)
            .await;
    }

    /// Number of GET requests made for `file`
    pub async fn fetches_of(&self, file: &RenderFile) -> usize {
        let wanted = format!("/files/{}", file.relative);
        self.requests_matching("GET", &wanted).await.len()
    }

    /// Bodies of every status update posted so far, in order
    pub async fn status_updates(&self) -> Vec<Value> {
        self.requests_matching("POST", "/downloads/status")
            .await
            .into_iter()
            .filter_map(|request| serde_json::from_slice(&request.body).ok())
            .collect()
    }

    async fn requests_matching(&self, verb: &str, wanted: &str) -> Vec<wiremock::Request> {
        self.server
            .received_requests()
            .await
            .unwrap_or_default()
            .into_iter()
            .filter(|r| r.method.as_str() == verb && r.url.path() == wanted)
            .collect()
    }
}
