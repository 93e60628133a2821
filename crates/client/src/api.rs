//! REST client for the processing service HTTP endpoints.
//!
//! Wraps submission (`/api/process/{function_id}`), staging uploads
//! (`/api/upload`), the progress stream (`/api/status/{function_id}`) and
//! artifact export (`/api/export/{filename}`) using [`reqwest`].

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::Url;
use serde::Deserialize;
use xlproc_core::job::SubmissionResult;
use xlproc_core::types::{FunctionId, ResultHandle};

use crate::backend::{EventByteStream, JobBackend};
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::payload::SubmissionPayload;

/// Default per-request timeout when none is configured.
const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

/// HTTP client for one processing service.
#[derive(Debug)]
pub struct ProcessorApi {
    client: reqwest::Client,
    base_url: Url,
    request_timeout: Duration,
}

/// Body returned by `/api/process/{function_id}`.
///
/// The service reports failures in-band as `{"error": "..."}`.
#[derive(Debug, Deserialize)]
pub struct ProcessResponse {
    #[serde(default)]
    pub output_file: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Body returned by `/api/upload`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct UploadResponse {
    #[serde(default)]
    pub message: Option<String>,
    /// Server-side paths of the stored files.
    #[serde(default)]
    pub file_paths: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

/// In-band error body used by the export route.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
}

/// Errors from the REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The HTTP request itself failed (network, DNS, TLS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The service returned a non-2xx status code.
    #[error("Processing service error ({status}): {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The service answered 2xx with an `error` body.
    #[error("Processing service reported: {0}")]
    Remote(String),

    /// A URL could not be built from the base URL and path segments.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl ProcessorApi {
    /// Create an API client for a service base URL, e.g. `http://host:8000`.
    pub fn new(api_url: &str) -> Result<Self, ApiError> {
        Self::with_client(reqwest::Client::new(), api_url, DEFAULT_REQUEST_TIMEOUT)
    }

    /// Create an API client reusing an existing [`reqwest::Client`].
    pub fn with_client(
        client: reqwest::Client,
        api_url: &str,
        request_timeout: Duration,
    ) -> Result<Self, ApiError> {
        let base_url = Url::parse(api_url.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidUrl(format!("{api_url}: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(ApiError::InvalidUrl(format!("{api_url}: not a base URL")));
        }
        Ok(Self {
            client,
            base_url,
            request_timeout,
        })
    }

    /// Build from configuration: shared client, configured timeouts.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        Self::with_client(
            config.http_client()?,
            &config.api_url,
            config.request_timeout,
        )
        .map_err(|e| ClientError::Config(e.to_string()))
    }

    /// Submit a payload for processing and wait for the final response.
    ///
    /// Sends `POST /api/process/{function_id}` with the multipart form.
    /// The call only returns once the service has finished the job.
    pub async fn process(
        &self,
        function_id: &FunctionId,
        payload: &SubmissionPayload,
    ) -> Result<ProcessResponse, ApiError> {
        let url = self.endpoint(&["api", "process", function_id.as_str()])?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .multipart(payload.to_form())
            .send()
            .await?;

        Self::parse_response(response).await
    }

    /// Stage files on the service without running a function.
    ///
    /// Sends `POST /api/upload` with the multipart form.
    pub async fn upload_files(
        &self,
        payload: &SubmissionPayload,
    ) -> Result<UploadResponse, ApiError> {
        let url = self.endpoint(&["api", "upload"])?;
        let response = self
            .client
            .post(url)
            .timeout(self.request_timeout)
            .multipart(payload.to_form())
            .send()
            .await?;

        let body: UploadResponse = Self::parse_response(response).await?;
        match body.error {
            Some(error) => Err(ApiError::Remote(error)),
            None => Ok(body),
        }
    }

    /// Open the server-sent-events progress stream for a function.
    ///
    /// Sends `GET /api/status/{function_id}`. No overall timeout is
    /// applied: the response body stays open for the life of the job.
    pub async fn open_status_stream(
        &self,
        function_id: &FunctionId,
    ) -> Result<reqwest::Response, ApiError> {
        let url = self.endpoint(&["api", "status", function_id.as_str()])?;
        let response = self
            .client
            .get(url)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await?;

        Self::ensure_success(response).await
    }

    /// Download an artifact by file name.
    ///
    /// Sends `GET /api/export/{filename}`. A JSON `{"error": ...}` body is
    /// reported as [`ApiError::Remote`]; anything else is the artifact.
    pub async fn download(&self, file_name: &str) -> Result<Vec<u8>, ApiError> {
        let url = self.endpoint(&["api", "export", file_name])?;
        let response = self
            .client
            .get(url)
            .timeout(self.request_timeout)
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/json"));
        let bytes = response.bytes().await?.to_vec();

        if is_json {
            if let Ok(body) = serde_json::from_slice::<ErrorBody>(&bytes) {
                return Err(ApiError::Remote(body.error));
            }
        }
        Ok(bytes)
    }

    // ---- private helpers ----

    /// Join percent-encoded path segments onto the base URL.
    fn endpoint(&self, segments: &[&str]) -> Result<Url, ApiError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|()| ApiError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or an [`ApiError::Status`]
    /// containing the status and body text on failure.
    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, ApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ApiError::Status {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl JobBackend for ProcessorApi {
    async fn submit(
        &self,
        function_id: &FunctionId,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResult, ApiError> {
        let response = self.process(function_id, payload).await?;
        Ok(SubmissionResult {
            result_handle: response.output_file.map(ResultHandle::new),
            remote_error: response.error,
        })
    }

    async fn status_stream(&self, function_id: &FunctionId) -> Result<EventByteStream, ApiError> {
        let response = self.open_status_stream(function_id).await?;
        Ok(response
            .bytes_stream()
            .map(|chunk| chunk.map(|bytes| bytes.to_vec()).map_err(ApiError::from))
            .boxed())
    }

    async fn export(&self, file_name: &str) -> Result<Vec<u8>, ApiError> {
        self.download(file_name).await
    }

    async fn upload(&self, payload: &SubmissionPayload) -> Result<UploadResponse, ApiError> {
        self.upload_files(payload).await
    }
}
