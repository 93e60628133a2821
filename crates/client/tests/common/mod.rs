//! Shared test infrastructure: a scripted in-memory [`JobBackend`].
//!
//! Submissions block until the test resolves them through a
//! [`SubmitGate`]; progress streams are fed chunk by chunk through a
//! [`StreamFeed`]. Counters record how many streams were opened and
//! released so tests can check that nothing leaks.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::NaiveDate;
use futures::StreamExt;
use tokio::sync::{mpsc, oneshot, watch};
use xlproc_client::api::{ApiError, UploadResponse};
use xlproc_client::backend::{EventByteStream, JobBackend};
use xlproc_client::payload::{build, BinaryFile, SubmissionPayload};
use xlproc_client::progress::ReconnectPolicy;
use xlproc_core::job::{Job, SubmissionResult};
use xlproc_core::types::{FormFields, FunctionId};

/// Upper bound for any single wait in a test.
pub const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

type SubmitReply = Result<SubmissionResult, ApiError>;
type Chunk = Result<Vec<u8>, ApiError>;

enum StreamScript {
    Feed(mpsc::UnboundedReceiver<Chunk>),
    Refuse(String),
}

#[derive(Default)]
pub struct FakeBackend {
    submissions: Mutex<VecDeque<oneshot::Receiver<SubmitReply>>>,
    streams: Mutex<VecDeque<StreamScript>>,
    artifacts: Mutex<HashMap<String, Vec<u8>>>,
    last_payload: Mutex<Option<SubmissionPayload>>,
    pub submit_calls: AtomicUsize,
    pub upload_calls: AtomicUsize,
    pub export_calls: AtomicUsize,
    /// Every `status_stream` call, refused or not.
    pub connect_attempts: AtomicUsize,
    /// Streams handed out successfully.
    pub stream_opens: AtomicUsize,
    /// Streams handed out and since dropped.
    pub stream_closes: Arc<AtomicUsize>,
}

/// Resolves one pending submission.
pub struct SubmitGate(oneshot::Sender<SubmitReply>);

impl SubmitGate {
    pub fn resolve(self, reply: SubmitReply) {
        let _ = self.0.send(reply);
    }

    pub fn succeed(self, handle: &str) {
        self.resolve(Ok(SubmissionResult::succeeded(
            xlproc_core::types::ResultHandle::new(handle),
        )));
    }
}

/// Pushes chunks into one scripted progress stream. Dropping the feed
/// ends the stream.
#[derive(Clone)]
pub struct StreamFeed(mpsc::UnboundedSender<Chunk>);

impl StreamFeed {
    pub fn status(&self, progress: u8, message: &str) {
        self.raw(&sse(progress, message));
    }

    pub fn raw(&self, bytes: &[u8]) {
        let _ = self.0.send(Ok(bytes.to_vec()));
    }

    pub fn fail(&self, reason: &str) {
        let _ = self.0.send(Err(ApiError::Remote(reason.to_string())));
    }
}

/// Bumps a counter when the stream it rides on is dropped.
struct CountOnDrop(Arc<AtomicUsize>);

impl Drop for CountOnDrop {
    fn drop(&mut self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Queue a submission; the matching `submit` call blocks until the
    /// returned gate is resolved.
    pub fn expect_submission(&self) -> SubmitGate {
        let (tx, rx) = oneshot::channel();
        self.submissions.lock().unwrap().push_back(rx);
        SubmitGate(tx)
    }

    /// Queue a progress stream for the next `status_stream` call.
    pub fn push_stream(&self) -> StreamFeed {
        let (tx, rx) = mpsc::unbounded_channel();
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Feed(rx));
        StreamFeed(tx)
    }

    /// Make the next `status_stream` call fail to connect.
    pub fn refuse_stream(&self, reason: &str) {
        self.streams
            .lock()
            .unwrap()
            .push_back(StreamScript::Refuse(reason.to_string()));
    }

    pub fn put_artifact(&self, file_name: &str, bytes: &[u8]) {
        self.artifacts
            .lock()
            .unwrap()
            .insert(file_name.to_string(), bytes.to_vec());
    }

    pub fn last_payload(&self) -> Option<SubmissionPayload> {
        self.last_payload.lock().unwrap().clone()
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }

    pub fn opens(&self) -> usize {
        Self::count(&self.stream_opens)
    }

    pub fn closes(&self) -> usize {
        Self::count(&self.stream_closes)
    }

    fn guarded(&self, stream: EventByteStream) -> EventByteStream {
        self.stream_opens.fetch_add(1, Ordering::SeqCst);
        let guard = CountOnDrop(Arc::clone(&self.stream_closes));
        stream
            .map(move |chunk| {
                let _keep = &guard;
                chunk
            })
            .boxed()
    }
}

#[async_trait]
impl JobBackend for FakeBackend {
    async fn submit(
        &self,
        _function_id: &FunctionId,
        payload: &SubmissionPayload,
    ) -> Result<SubmissionResult, ApiError> {
        self.submit_calls.fetch_add(1, Ordering::SeqCst);
        *self.last_payload.lock().unwrap() = Some(payload.clone());

        let gate = self.submissions.lock().unwrap().pop_front();
        match gate {
            Some(rx) => rx
                .await
                .unwrap_or_else(|_| Err(ApiError::Remote("submission gate dropped".into()))),
            None => Err(ApiError::Remote("no scripted submission".into())),
        }
    }

    async fn status_stream(&self, _function_id: &FunctionId) -> Result<EventByteStream, ApiError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        let script = self.streams.lock().unwrap().pop_front();
        match script {
            Some(StreamScript::Feed(rx)) => {
                let stream = futures::stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|chunk| (chunk, rx))
                })
                .boxed();
                Ok(self.guarded(stream))
            }
            Some(StreamScript::Refuse(reason)) => Err(ApiError::Status {
                status: 503,
                body: reason,
            }),
            None => Ok(self.guarded(futures::stream::pending().boxed())),
        }
    }

    async fn export(&self, file_name: &str) -> Result<Vec<u8>, ApiError> {
        self.export_calls.fetch_add(1, Ordering::SeqCst);
        self.artifacts
            .lock()
            .unwrap()
            .get(file_name)
            .cloned()
            .ok_or_else(|| ApiError::Remote("File not found".into()))
    }

    async fn upload(&self, payload: &SubmissionPayload) -> Result<UploadResponse, ApiError> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        Ok(UploadResponse {
            message: Some("Files uploaded successfully".into()),
            file_paths: payload
                .files
                .iter()
                .map(|f| format!("backend/uploads/{}", f.name))
                .collect(),
            error: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// One encoded status frame.
pub fn sse(progress: u8, message: &str) -> Vec<u8> {
    let data = serde_json::json!({ "progress": progress, "message": message });
    format!("data: {data}\n\n").into_bytes()
}

pub fn fields() -> FormFields {
    FormFields {
        text1: "Sheet1".into(),
        text2: "Region".into(),
        text3: String::new(),
        selected_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
    }
}

pub fn two_file_payload() -> SubmissionPayload {
    build(
        vec![
            BinaryFile::new("jan.xlsx", b"jan-bytes".to_vec()),
            BinaryFile::new("feb.xlsx", b"feb-bytes".to_vec()),
        ],
        fields(),
    )
}

pub fn func(id: &str) -> FunctionId {
    FunctionId::new(id).unwrap()
}

/// Reconnect quickly so tests stay fast.
pub fn fast_reconnect(max_attempts: u32) -> ReconnectPolicy {
    ReconnectPolicy {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        max_delay: Duration::from_millis(20),
        multiplier: 2.0,
    }
}

// ---------------------------------------------------------------------------
// Waiting
// ---------------------------------------------------------------------------

/// Wait until the job record satisfies `predicate`.
pub async fn wait_for_job(rx: &mut watch::Receiver<Job>, predicate: impl FnMut(&Job) -> bool) -> Job {
    tokio::time::timeout(WAIT_TIMEOUT, rx.wait_for(predicate))
        .await
        .expect("timed out waiting for job state")
        .expect("job channel closed")
        .clone()
}

/// Poll `condition` until it holds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    };
    tokio::time::timeout(WAIT_TIMEOUT, poll)
        .await
        .expect("timed out waiting for condition");
}

/// Await `future` with the shared timeout.
pub async fn within<T>(future: impl Future<Output = T>) -> T {
    tokio::time::timeout(WAIT_TIMEOUT, future)
        .await
        .expect("timed out")
}
