//! Job orchestration: one submission, one progress channel, one job record.
//!
//! [`JobOrchestrator::submit`] marks the job as submitting, opens the
//! progress channel, sends the payload and merges both sources into the
//! job record until the submission resolves. Observers follow the record
//! through [`JobOrchestrator::subscribe`].
//!
//! The driver runs as a spawned task. Dropping the future returned by
//! `submit` does not abort the job: the submission still completes, the
//! record still reaches a terminal state and the channel is still closed.

use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use xlproc_core::job::{Job, JobEvent, JobState};
use xlproc_core::types::{FunctionId, ResultHandle};

use crate::api::ProcessorApi;
use crate::backend::JobBackend;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::payload::SubmissionPayload;
use crate::progress::{ChannelEvent, ProgressChannel, ReconnectPolicy};
use crate::retriever::ResultRetriever;

/// What to run and on which inputs.
#[derive(Debug, Clone)]
pub struct JobRequest {
    pub function_id: FunctionId,
    pub payload: SubmissionPayload,
}

impl JobRequest {
    pub fn new(function_id: FunctionId, payload: SubmissionPayload) -> Self {
        Self {
            function_id,
            payload,
        }
    }
}

/// Owns the single active job and drives it to a terminal state.
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    backend: Arc<dyn JobBackend>,
    job: watch::Sender<Job>,
    reconnect: ReconnectPolicy,
    /// Closes the progress channel of the in-flight job, if any.
    stream_cancel: Mutex<Option<CancellationToken>>,
}

impl JobOrchestrator {
    pub fn new(backend: Arc<dyn JobBackend>, reconnect: ReconnectPolicy) -> Self {
        let (job, _) = watch::channel(Job::idle());
        Self {
            inner: Arc::new(Inner {
                backend,
                job,
                reconnect,
                stream_cancel: Mutex::new(None),
            }),
        }
    }

    /// Orchestrator talking to the service named in `config`.
    pub fn from_config(config: &ClientConfig) -> Result<Self, ClientError> {
        let api = ProcessorApi::from_config(config)?;
        Ok(Self::new(Arc::new(api), config.reconnect_policy()))
    }

    /// Follow the job record. The receiver sees the current value at once.
    pub fn subscribe(&self) -> watch::Receiver<Job> {
        self.inner.job.subscribe()
    }

    /// Copy of the current job record.
    pub fn snapshot(&self) -> Job {
        self.inner.job.borrow().clone()
    }

    /// Retriever sharing this orchestrator's backend.
    pub fn retriever(&self) -> ResultRetriever {
        ResultRetriever::new(Arc::clone(&self.inner.backend))
    }

    /// Stop receiving progress for the in-flight job.
    ///
    /// Only the progress channel is closed; the submission keeps running
    /// and still decides the job's outcome. No-op when nothing is running.
    pub fn cancel(&self) {
        if let Some(token) = self.inner.lock_stream_cancel().as_ref() {
            tracing::info!("Closing progress channel on request");
            token.cancel();
        }
    }

    /// Submit a job and wait for it to reach a terminal state.
    ///
    /// Returns the result handle on success. Fails immediately with
    /// [`ClientError::NoInputProvided`] for an empty payload or
    /// [`ClientError::JobAlreadyInFlight`] while another job runs; in both
    /// cases the job record is left as it was.
    pub async fn submit(&self, request: JobRequest) -> Result<ResultHandle, ClientError> {
        let JobRequest {
            function_id,
            payload,
        } = request;

        if payload.is_empty() {
            tracing::warn!(function_id = %function_id, "Refusing to submit a job without input files");
            return Err(ClientError::NoInputProvided);
        }

        let mut conflict = None;
        self.inner
            .job
            .send_if_modified(|job| match job.begin(function_id.clone()) {
                Ok(()) => true,
                Err(e) => {
                    conflict = Some(e);
                    false
                }
            });
        if let Some(e) = conflict {
            tracing::warn!(function_id = %function_id, error = %e, "Submission rejected");
            return Err(ClientError::JobAlreadyInFlight(e.to_string()));
        }

        tracing::info!(
            function_id = %function_id,
            files = payload.file_count(),
            bytes = payload.total_bytes(),
            "Job submitted",
        );

        let stream_cancel = CancellationToken::new();
        *self.inner.lock_stream_cancel() = Some(stream_cancel.clone());

        let inner = Arc::clone(&self.inner);
        let driver = tokio::spawn(async move { inner.drive(function_id, payload, stream_cancel).await });

        match driver.await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(error = %e, "Job driver task failed");
                let cause = format!("job driver failed: {e}");
                self.inner.lock_stream_cancel().take();
                self.inner.apply(JobEvent::SubmissionRejected(cause.clone()));
                Err(ClientError::SubmissionFailed(cause))
            }
        }
    }

    /// Stage files on the service without processing them.
    ///
    /// Independent of the job record. Returns the stored server-side paths.
    pub async fn upload(&self, payload: &SubmissionPayload) -> Result<Vec<String>, ClientError> {
        if payload.is_empty() {
            return Err(ClientError::NoInputProvided);
        }

        let response = self
            .inner
            .backend
            .upload(payload)
            .await
            .map_err(|e| ClientError::SubmissionFailed(e.to_string()))?;

        tracing::info!(
            files = response.file_paths.len(),
            detail = response.message.as_deref().unwrap_or(""),
            "Files uploaded",
        );
        Ok(response.file_paths)
    }
}

impl Inner {
    fn apply(&self, event: JobEvent) -> bool {
        self.job.send_if_modified(|job| job.apply(event))
    }

    fn lock_stream_cancel(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        self.stream_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Merge progress and the submission outcome into the job record.
    async fn drive(
        &self,
        function_id: FunctionId,
        payload: SubmissionPayload,
        stream_cancel: CancellationToken,
    ) -> Result<ResultHandle, ClientError> {
        // Open before sending so that early events are not missed.
        let mut channel = Some(ProgressChannel::open(
            Arc::clone(&self.backend),
            function_id.clone(),
            self.reconnect.clone(),
        ));

        let submission = self.backend.submit(&function_id, &payload);
        tokio::pin!(submission);

        let result = loop {
            tokio::select! {
                biased;

                event = next_event(&mut channel) => match event {
                    Some(ChannelEvent::Status(status)) => {
                        self.apply(JobEvent::StatusReceived(status));
                    }
                    Some(ChannelEvent::Disconnected(reason)) => {
                        let notice = ClientError::StreamDisconnected(reason.clone());
                        tracing::info!(function_id = %function_id, error = %notice, "Job continues without live progress");
                        self.apply(JobEvent::StreamDisconnected(reason));
                    }
                    None => {
                        tracing::info!(function_id = %function_id, "Progress channel ended before the job");
                        close_channel(&mut channel).await;
                    }
                },

                _ = stream_cancel.cancelled(), if channel.is_some() => {
                    close_channel(&mut channel).await;
                }

                result = &mut submission => break result,
            }
        };

        // Released before the job turns terminal: a later submit installs
        // its own token as soon as `begin` succeeds.
        self.lock_stream_cancel().take();

        let event = match result {
            Ok(outcome) => JobEvent::SubmissionResolved(outcome),
            Err(e) => JobEvent::SubmissionRejected(e.to_string()),
        };
        self.apply(event);

        close_channel(&mut channel).await;

        let job = self.job.borrow().clone();
        match (job.state, job.result_handle) {
            (JobState::Succeeded, Some(handle)) => {
                tracing::info!(function_id = %function_id, result = %handle, "Job succeeded");
                Ok(handle)
            }
            (state, _) => {
                let error = job
                    .error
                    .unwrap_or_else(|| format!("job ended in state {state}"));
                tracing::error!(function_id = %function_id, error = %error, "Job failed");
                Err(ClientError::SubmissionFailed(error))
            }
        }
    }
}

/// Next channel event, or never when the channel is already closed.
async fn next_event(channel: &mut Option<ProgressChannel>) -> Option<ChannelEvent> {
    match channel {
        Some(channel) => channel.next().await,
        None => std::future::pending().await,
    }
}

async fn close_channel(channel: &mut Option<ProgressChannel>) {
    if let Some(channel) = channel.take() {
        channel.close().await;
    }
}
