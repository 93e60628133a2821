//! Server-pushed progress channel for one function's job.
//!
//! [`ProgressChannel::open`] spawns a reader task that connects to the
//! status stream, decodes each event into a [`StatusEvent`] and forwards
//! it to the channel owner. Undecodable events are dropped. When the
//! connection is lost the owner receives a
//! [`ChannelEvent::Disconnected`] and, if the [`ReconnectPolicy`]
//! allows, the reader reconnects with exponential backoff.
//!
//! The channel must be closed once the job is terminal. Dropping it has
//! the same effect, without waiting for the reader to finish.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use xlproc_core::types::{FunctionId, StatusEvent};

use crate::backend::{EventByteStream, JobBackend};
use crate::sse::SseDecoder;

/// Buffered events between the reader task and the channel owner.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Tunable parameters for reconnecting a dropped progress stream.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Reconnect attempts after a loss before giving up. `0` disables.
    pub max_attempts: u32,
    /// Delay before the first reconnection attempt.
    pub initial_delay: Duration,
    /// Upper bound on the delay between attempts.
    pub max_delay: Duration,
    /// Factor by which the delay grows after each failure.
    pub multiplier: f64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
        }
    }
}

impl ReconnectPolicy {
    /// Never reconnect: the first loss ends the channel.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Default::default()
        }
    }
}

/// Calculate the next backoff delay from the current delay and policy.
///
/// The result is clamped to [`ReconnectPolicy::max_delay`].
pub fn next_delay(current: Duration, policy: &ReconnectPolicy) -> Duration {
    let next_ms = (current.as_millis() as f64 * policy.multiplier) as u64;
    Duration::from_millis(next_ms).min(policy.max_delay)
}

/// Item yielded by a [`ProgressChannel`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Status(StatusEvent),
    /// The connection was lost. The reader may reconnect afterwards.
    Disconnected(String),
}

/// Handle to a running progress stream.
pub struct ProgressChannel {
    function_id: FunctionId,
    rx: mpsc::Receiver<ChannelEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl ProgressChannel {
    /// Start streaming progress for `function_id`.
    ///
    /// Returns immediately; the connection is made by a background task,
    /// so this can be called right before the submission is sent without
    /// delaying it.
    pub fn open(
        backend: Arc<dyn JobBackend>,
        function_id: FunctionId,
        policy: ReconnectPolicy,
    ) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let task = tokio::spawn(run_reader(
            backend,
            function_id.clone(),
            policy,
            tx,
            cancel.clone(),
        ));

        tracing::debug!(function_id = %function_id, "Progress channel opened");

        Self {
            function_id,
            rx,
            cancel,
            task: Some(task),
        }
    }

    /// Wait for the next item. `None` once the reader has given up or
    /// the channel is closed.
    pub async fn next(&mut self) -> Option<ChannelEvent> {
        self.rx.recv().await
    }

    /// Stop the reader and release the connection, waiting for the
    /// reader task to exit.
    pub async fn close(mut self) {
        self.cancel.cancel();
        self.rx.close();
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                tracing::warn!(function_id = %self.function_id, error = %e, "Progress reader task failed");
            }
        }
        tracing::debug!(function_id = %self.function_id, "Progress channel closed");
    }
}

impl Drop for ProgressChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// How a single connection ended.
enum ReadOutcome {
    /// The channel was closed by its owner.
    Cancelled,
    /// The connection was lost.
    Lost { reason: String, received: bool },
}

/// Reader task: connect, forward events, reconnect per policy.
async fn run_reader(
    backend: Arc<dyn JobBackend>,
    function_id: FunctionId,
    policy: ReconnectPolicy,
    tx: mpsc::Sender<ChannelEvent>,
    cancel: CancellationToken,
) {
    let mut delay = policy.initial_delay;
    let mut attempt = 0u32;

    loop {
        let connected = tokio::select! {
            _ = cancel.cancelled() => return,
            result = backend.status_stream(&function_id) => result,
        };

        let reason = match connected {
            Ok(stream) => {
                tracing::debug!(function_id = %function_id, "Progress stream connected");
                match read_events(stream, &function_id, &tx, &cancel).await {
                    ReadOutcome::Cancelled => return,
                    ReadOutcome::Lost { reason, received } => {
                        // Only a connection that delivered something resets the backoff.
                        if received {
                            attempt = 0;
                            delay = policy.initial_delay;
                        }
                        reason
                    }
                }
            }
            Err(e) => e.to_string(),
        };

        tracing::warn!(
            function_id = %function_id,
            error = %reason,
            "Progress stream disconnected",
        );
        if tx
            .send(ChannelEvent::Disconnected(reason))
            .await
            .is_err()
        {
            return;
        }

        if attempt >= policy.max_attempts {
            tracing::info!(function_id = %function_id, "Giving up on progress stream");
            return;
        }
        attempt += 1;

        tracing::info!(
            function_id = %function_id,
            attempt,
            delay_ms = delay.as_millis() as u64,
            "Reconnecting progress stream",
        );

        // Wait before the next attempt, respecting cancellation.
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }

        delay = next_delay(delay, &policy);
    }
}

/// Forward decoded events from one connection until it ends.
async fn read_events(
    mut stream: EventByteStream,
    function_id: &FunctionId,
    tx: &mpsc::Sender<ChannelEvent>,
    cancel: &CancellationToken,
) -> ReadOutcome {
    let mut decoder = SseDecoder::new();
    let mut received = false;

    loop {
        let chunk = tokio::select! {
            _ = cancel.cancelled() => return ReadOutcome::Cancelled,
            chunk = stream.next() => chunk,
        };

        let bytes = match chunk {
            Some(Ok(bytes)) => bytes,
            Some(Err(e)) => {
                return ReadOutcome::Lost {
                    reason: e.to_string(),
                    received,
                }
            }
            None => {
                return ReadOutcome::Lost {
                    reason: "server closed the stream".to_string(),
                    received,
                }
            }
        };

        let events = match decoder.push(&bytes) {
            Ok(events) => events,
            Err(e) => {
                return ReadOutcome::Lost {
                    reason: e.to_string(),
                    received,
                }
            }
        };

        for data in events {
            match StatusEvent::from_json(&data) {
                Ok(event) => {
                    received = true;
                    tracing::debug!(
                        function_id = %function_id,
                        progress = event.progress,
                        status_message = %event.message,
                        "Status event",
                    );
                    if tx.send(ChannelEvent::Status(event)).await.is_err() {
                        return ReadOutcome::Cancelled;
                    }
                }
                Err(e) => {
                    tracing::warn!(
                        function_id = %function_id,
                        error = %e,
                        raw_event = %data,
                        "Dropping undecodable status event",
                    );
                }
            }
        }
    }
}
