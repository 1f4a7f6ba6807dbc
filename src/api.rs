//! HTTP client for the render-farm service
//!
//! Three JSON endpoints are used:
//! - `POST downloads/next`: next job available for a location
//! - `POST downloads/{job_id}`: the download job of one render job (optionally one task)
//! - `POST downloads/status`: progress reports
//!
//! A job is returned only on `201 Created`; any other status means "nothing available".

use crate::config::Config;
use crate::error::{Error, Result};
use crate::types::{Job, StatusUpdate};
use reqwest::StatusCode;
use serde::Serialize;
use url::Url;

/// Body of the polling requests
#[derive(Debug, Serialize)]
struct PollRequest<'a> {
    location: Option<&'a str>,
}

/// Client for the render-farm download endpoints
#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base_url: Url,
    api_key: Option<String>,
}

impl ApiClient {
    /// Build a client from the `api` section of the configuration
    pub fn new(config: &Config) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.api.timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url()?,
            api_key: config.api.api_key.clone(),
        })
    }

    /// Base URL all endpoints are resolved against
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// Ask for the next download job available at `location`
    ///
    /// Returns `Ok(None)` when the service answers with anything but 201.
    pub async fn next_download(&self, location: Option<&str>) -> Result<Option<Job>> {
        self.poll("downloads/next", location, None).await
    }

    /// Ask for the download job belonging to `job_id`
    ///
    /// `task_id` narrows the request to one task of the job and is sent as the
    /// `tid` query parameter.
    pub async fn download_for_job(
        &self,
        job_id: &str,
        task_id: Option<&str>,
        location: Option<&str>,
    ) -> Result<Option<Job>> {
        let endpoint = format!("downloads/{job_id}");
        self.poll(&endpoint, location, task_id).await
    }

    /// Post a progress report; returns the status code the service answered with
    pub async fn post_status(&self, update: &StatusUpdate) -> Result<StatusCode> {
        let url = self.endpoint("downloads/status")?;
        let response = self.authorized(self.http.post(url)).json(update).send().await?;
        let status = response.status();
        tracing::debug!(
            download_id = %update.download_id,
            status = status.as_u16(),
            "status update acknowledged"
        );
        Ok(status)
    }

    async fn poll(
        &self,
        endpoint: &str,
        location: Option<&str>,
        task_id: Option<&str>,
    ) -> Result<Option<Job>> {
        let url = self.endpoint(endpoint)?;
        tracing::debug!(url = %url, location, task_id, "polling for download job");

        let mut request = self
            .authorized(self.http.post(url))
            .json(&PollRequest { location });
        if let Some(tid) = task_id {
            request = request.query(&[("tid", tid)]);
        }

        let response = request.send().await?;
        let status = response.status();
        if status != StatusCode::CREATED {
            tracing::debug!(status = status.as_u16(), "no download job available");
            return Ok(None);
        }

        let body = response.text().await?;
        let job: Job = serde_json::from_str(&body)?;
        tracing::info!(
            download_id = %job.download_id,
            files = job.downloads.len(),
            destination = %job.destination_root,
            "received download job"
        );
        Ok(Some(job))
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base_url
            .join(path)
            .map_err(|e| Error::Other(format!("invalid endpoint '{path}': {e}")))
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}
