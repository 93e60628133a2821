//! Client-facing error taxonomy.

use std::path::PathBuf;

use xlproc_core::error::CoreError;

/// Errors surfaced by the orchestrator, the payload builder and the
/// result retriever.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// A local input file could not be read.
    #[error("Cannot read input file {}: {source}", .path.display())]
    InputUnreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Submission was attempted with no files; nothing was sent.
    #[error("No input files provided")]
    NoInputProvided,

    /// Another job is still running on this orchestrator.
    #[error("A job is already in flight: {0}")]
    JobAlreadyInFlight(String),

    /// The progress stream was lost. Advisory; never fails a job.
    #[error("Progress stream disconnected: {0}")]
    StreamDisconnected(String),

    /// The service rejected the job or could not be reached.
    #[error("Submission failed: {0}")]
    SubmissionFailed(String),

    /// There is no result handle to retrieve.
    #[error("No result available")]
    NoResultAvailable,

    /// Fetching or persisting the artifact failed. Safe to retry.
    #[error("Retrieval failed: {0}")]
    RetrievalFailed(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Core(#[from] CoreError),
}
