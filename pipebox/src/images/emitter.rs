//! Pull-progress republishing.
//!
//! The engine writes raw progress records (newline-delimited JSON) into one
//! end of an in-memory pipe; a [`ProgressForwarder`] task reads the other end
//! and republishes each parsed record through an [`Emitter`].

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Byte progress of one layer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressDetail {
    #[serde(default)]
    pub current: Option<i64>,
    #[serde(default)]
    pub total: Option<i64>,
}

/// One structured pull-progress record as reported by the engine.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullStatus {
    /// Layer or image id the record refers to.
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    /// Human-readable progress bar.
    #[serde(default)]
    pub progress: Option<String>,
    #[serde(default, rename = "progressDetail")]
    pub progress_detail: Option<ProgressDetail>,
    #[serde(default)]
    pub error: Option<String>,
}

/// A progress record tagged with the pipeline it belongs to.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
    pub pipeline_id: String,
    pub status: PullStatus,
}

/// Publishing end of the status sink.
///
/// Cheap to clone. An emitter without a consumer drops every event.
#[derive(Clone, Debug, Default)]
pub struct Emitter {
    sender: Option<mpsc::UnboundedSender<StatusEvent>>,
}

impl Emitter {
    pub fn new(sender: mpsc::UnboundedSender<StatusEvent>) -> Self {
        Self {
            sender: Some(sender),
        }
    }

    /// Emitter plus the receiver the presentation layer consumes.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<StatusEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn discard() -> Self {
        Self { sender: None }
    }

    pub fn emit(&self, pipeline_id: &str, status: PullStatus) {
        let Some(sender) = &self.sender else {
            return;
        };
        let event = StatusEvent {
            pipeline_id: pipeline_id.to_string(),
            status,
        };
        if sender.send(event).is_err() {
            tracing::trace!(pipeline_id = %pipeline_id, "Status sink closed, dropping event");
        }
    }
}

/// Background task draining a progress pipe into an [`Emitter`].
///
/// The task ends when the writer half is dropped (EOF), on a read error, or
/// when the token is cancelled. [`finish`](Self::finish) waits for it.
pub(crate) struct ProgressForwarder {
    handle: JoinHandle<usize>,
}

impl ProgressForwarder {
    pub(crate) fn spawn<R>(
        reader: R,
        emitter: Emitter,
        pipeline_id: String,
        cancel: CancellationToken,
    ) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut lines = BufReader::new(reader).lines();
            let mut delivered = 0usize;

            loop {
                let line = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        tracing::debug!(pipeline_id = %pipeline_id, "Pull progress cancelled");
                        break;
                    }
                    line = lines.next_line() => line,
                };

                match line {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<PullStatus>(line) {
                            Ok(status) => {
                                emitter.emit(&pipeline_id, status);
                                delivered += 1;
                            }
                            Err(e) => {
                                tracing::debug!(
                                    pipeline_id = %pipeline_id,
                                    "Skipping malformed progress record: {}", e
                                );
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(
                            pipeline_id = %pipeline_id,
                            "Failed to read pull progress: {}", e
                        );
                        break;
                    }
                }
            }

            tracing::trace!(pipeline_id = %pipeline_id, delivered, "Pull progress stream closed");
            delivered
        });

        Self { handle }
    }

    /// Wait for the task and return how many records it delivered.
    pub(crate) async fn finish(self) -> usize {
        match self.handle.await {
            Ok(delivered) => delivered,
            Err(e) => {
                tracing::warn!("Pull progress task failed: {}", e);
                0
            }
        }
    }
}
