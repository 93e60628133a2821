//! Transport seam between the orchestration logic and the service.
//!
//! [`ProcessorApi`](crate::api::ProcessorApi) is the production
//! implementation; tests substitute in-memory backends.

use async_trait::async_trait;
use futures::stream::BoxStream;
use xlproc_core::job::SubmissionResult;
use xlproc_core::types::FunctionId;

use crate::api::{ApiError, UploadResponse};
use crate::payload::SubmissionPayload;

/// Raw body chunks of a `text/event-stream` response.
pub type EventByteStream = BoxStream<'static, Result<Vec<u8>, ApiError>>;

#[async_trait]
pub trait JobBackend: Send + Sync {
    /// Run `function_id` over the payload and wait for the final response.
    async fn submit(
        &self,
        function_id: &FunctionId,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResult, ApiError>;

    /// Open the progress stream scoped to `function_id`.
    async fn status_stream(&self, function_id: &FunctionId) -> Result<EventByteStream, ApiError>;

    /// Fetch the artifact stored under `file_name`.
    async fn export(&self, file_name: &str) -> Result<Vec<u8>, ApiError>;

    /// Store files on the service without processing them.
    async fn upload(&self, payload: &SubmissionPayload) -> Result<UploadResponse, ApiError>;
}
