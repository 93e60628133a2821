//! The job record and the reducer that drives its state machine.
//!
//! A [`Job`] is mutated only through [`Job::begin`] and [`Job::apply`].
//! Both information sources of a running job (the submission call and the
//! progress stream) are turned into tagged [`JobEvent`]s and fed through
//! `apply` one at a time, in arrival order. Terminal states are sticky:
//! once a job has succeeded or failed, every further event is ignored.

use std::fmt;

use serde::Serialize;

use crate::error::CoreError;
use crate::types::{FunctionId, ResultHandle, StatusEvent};

/// Fallback error text when the service answers without an output file.
pub const NO_OUTPUT_ERROR: &str = "Remote service produced no output file";

// ---------------------------------------------------------------------------
// JobState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    /// No job has been submitted yet.
    Idle,
    /// Payload sent; waiting for the first status event or the response.
    Submitting,
    /// At least one status event has been received.
    Streaming,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// A job in this state blocks new submissions.
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Submitting | Self::Streaming)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitting => "submitting",
            Self::Streaming => "streaming",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

/// Outcome of a submission call that reached the service.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmissionResult {
    /// Present when the service produced an artifact.
    pub result_handle: Option<ResultHandle>,
    /// Error text reported in the response body, if any.
    pub remote_error: Option<String>,
}

impl SubmissionResult {
    pub fn succeeded(handle: ResultHandle) -> Self {
        Self {
            result_handle: Some(handle),
            remote_error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            result_handle: None,
            remote_error: Some(error.into()),
        }
    }
}

/// Everything that can change a running job, from either source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobEvent {
    /// A progress update arrived on the progress stream.
    StatusReceived(StatusEvent),
    /// The progress stream was lost. Advisory only.
    StreamDisconnected(String),
    /// The submission call returned a response.
    SubmissionResolved(SubmissionResult),
    /// The submission call failed before producing a response.
    SubmissionRejected(String),
}

// ---------------------------------------------------------------------------
// Job
// ---------------------------------------------------------------------------

/// Snapshot of the single job owned by an orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    /// `None` only while [`JobState::Idle`].
    pub function_id: Option<FunctionId>,
    pub state: JobState,
    /// Completion percentage (0-100).
    pub progress: u8,
    /// Latest human-readable status text from the service.
    pub message: String,
    /// Set only in [`JobState::Succeeded`].
    pub result_handle: Option<ResultHandle>,
    /// Set only in [`JobState::Failed`].
    pub error: Option<String>,
    /// Best-effort advisory text (e.g. lost progress stream).
    pub notice: Option<String>,
}

impl Default for Job {
    fn default() -> Self {
        Self::idle()
    }
}

impl Job {
    pub fn idle() -> Self {
        Self {
            function_id: None,
            state: JobState::Idle,
            progress: 0,
            message: String::new(),
            result_handle: None,
            error: None,
            notice: None,
        }
    }

    /// Replace this record with a fresh job in [`JobState::Submitting`].
    ///
    /// Fails with [`CoreError::Conflict`] while another job is in flight,
    /// leaving the record untouched.
    pub fn begin(&mut self, function_id: FunctionId) -> Result<(), CoreError> {
        if self.state.is_in_flight() {
            let running = self
                .function_id
                .as_ref()
                .map(FunctionId::as_str)
                .unwrap_or("unknown");
            return Err(CoreError::Conflict(format!(
                "job '{running}' is still {}",
                self.state
            )));
        }

        *self = Self {
            function_id: Some(function_id),
            state: JobState::Submitting,
            ..Self::idle()
        };
        Ok(())
    }

    /// Apply one event. Returns `true` if the record changed.
    pub fn apply(&mut self, event: JobEvent) -> bool {
        if !self.state.is_in_flight() {
            return false;
        }

        match event {
            JobEvent::StatusReceived(status) => {
                self.state = JobState::Streaming;
                self.progress = status.progress;
                self.message = status.message;
            }
            JobEvent::StreamDisconnected(reason) => {
                self.notice = Some(format!("Progress updates unavailable: {reason}"));
            }
            JobEvent::SubmissionResolved(SubmissionResult {
                result_handle: Some(handle),
                ..
            }) => {
                self.state = JobState::Succeeded;
                self.progress = 100;
                self.result_handle = Some(handle);
            }
            JobEvent::SubmissionResolved(SubmissionResult { remote_error, .. }) => {
                self.fail(remote_error.unwrap_or_else(|| NO_OUTPUT_ERROR.to_string()));
            }
            JobEvent::SubmissionRejected(cause) => self.fail(cause),
        }
        true
    }

    fn fail(&mut self, error: String) {
        self.state = JobState::Failed;
        self.result_handle = None;
        self.error = Some(error);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn running() -> Job {
        let mut job = Job::idle();
        job.begin(FunctionId::new("func1").unwrap()).unwrap();
        job
    }

    fn status(progress: u8, message: &str) -> JobEvent {
        JobEvent::StatusReceived(StatusEvent::new(progress, message))
    }

    #[test]
    fn begin_moves_idle_job_to_submitting() {
        let job = running();
        assert_eq!(job.state, JobState::Submitting);
        assert_eq!(job.function_id.as_ref().unwrap().as_str(), "func1");
        assert_eq!(job.progress, 0);
    }

    #[test]
    fn begin_rejects_in_flight_job_without_touching_it() {
        let mut job = running();
        job.apply(status(30, "working"));
        let before = job.clone();

        let result = job.begin(FunctionId::new("func2").unwrap());
        assert_matches!(result, Err(CoreError::Conflict(msg)) if msg.contains("func1"));
        assert_eq!(job, before);
    }

    #[test]
    fn begin_replaces_terminal_job() {
        let mut job = running();
        job.apply(JobEvent::SubmissionRejected("boom".into()));

        job.begin(FunctionId::new("func2").unwrap()).unwrap();
        assert_eq!(job.state, JobState::Submitting);
        assert!(job.error.is_none());
        assert_eq!(job.function_id.as_ref().unwrap().as_str(), "func2");
    }

    #[test]
    fn idle_job_ignores_events() {
        let mut job = Job::idle();
        assert!(!job.apply(status(50, "stray")));
        assert_eq!(job, Job::idle());
    }

    #[test]
    fn latest_status_event_wins() {
        let mut job = running();
        for (p, m) in [(10, "parsing"), (60, "merging"), (40, "re-reading")] {
            assert!(job.apply(status(p, m)));
            assert_eq!(job.progress, p);
            assert_eq!(job.message, m);
        }
        assert_eq!(job.state, JobState::Streaming);
    }

    #[test]
    fn resolved_with_handle_succeeds_at_full_progress() {
        let mut job = running();
        job.apply(status(60, "merging"));
        job.apply(JobEvent::SubmissionResolved(SubmissionResult::succeeded(
            ResultHandle::new("merged.xlsx"),
        )));

        assert_eq!(job.state, JobState::Succeeded);
        assert_eq!(job.progress, 100);
        assert_eq!(job.result_handle, Some(ResultHandle::new("merged.xlsx")));
        assert!(job.error.is_none());
    }

    #[test]
    fn resolved_without_handle_fails() {
        let mut job = running();
        job.apply(JobEvent::SubmissionResolved(SubmissionResult::default()));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some(NO_OUTPUT_ERROR));

        let mut job = running();
        job.apply(JobEvent::SubmissionResolved(SubmissionResult::failed(
            "sheet missing",
        )));
        assert_eq!(job.error.as_deref(), Some("sheet missing"));
    }

    #[test]
    fn rejected_submission_fails() {
        let mut job = running();
        job.apply(JobEvent::SubmissionRejected("connection reset".into()));
        assert_eq!(job.state, JobState::Failed);
        assert_eq!(job.error.as_deref(), Some("connection reset"));
        assert!(job.result_handle.is_none());
    }

    #[test]
    fn disconnect_is_advisory() {
        let mut job = running();
        job.apply(status(20, "step 1"));
        assert!(job.apply(JobEvent::StreamDisconnected("eof".into())));

        assert_eq!(job.state, JobState::Streaming);
        assert_eq!(job.progress, 20);
        assert_eq!(job.message, "step 1");
        assert!(job.notice.as_deref().unwrap().contains("eof"));
    }

    #[test]
    fn terminal_states_are_sticky() {
        let mut succeeded = running();
        succeeded.apply(JobEvent::SubmissionResolved(SubmissionResult::succeeded(
            ResultHandle::new("out.xlsx"),
        )));
        let mut failed = running();
        failed.apply(JobEvent::SubmissionRejected("timeout".into()));

        for job in [&mut succeeded, &mut failed] {
            let before = job.clone();
            assert!(!job.apply(status(5, "late event")));
            assert!(!job.apply(JobEvent::StreamDisconnected("late".into())));
            assert!(!job.apply(JobEvent::SubmissionRejected("again".into())));
            assert!(!job.apply(JobEvent::SubmissionResolved(SubmissionResult::succeeded(
                ResultHandle::new("other.xlsx"),
            ))));
            assert_eq!(*job, before);
        }
    }
}
