//! Shared normalization and stream plumbing for vendor clients.

use crate::api::completion::Usage;
use crate::api::streaming::{ChatStream, ChatStreamResponse, SseData};
use crate::client::{CancelToken, SseStream};
use crate::error::{Result, RouterError};
use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;
use uuid::Uuid;

/// Buffered chunks per stream before the producer waits on the consumer
pub const STREAM_BUFFER: usize = 32;

/// Fresh response id, `chatcmpl-` followed by 32 hex characters
pub fn new_request_id() -> String {
    format!("chatcmpl-{}", Uuid::new_v4().simple())
}

/// Current time as Unix seconds
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Usage is only meaningful once the upstream reports a finish reason
pub fn usage_when_finished(finish_reason: &str, usage: Option<Usage>) -> Option<Usage> {
    if finish_reason.is_empty() {
        None
    } else {
        Some(usage.unwrap_or_default())
    }
}

/// Visible text and reasoning text collected from vendor parts
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SplitText {
    pub content: String,
    pub reasoning: String,
}

impl SplitText {
    pub fn push(&mut self, text: &str, thought: bool) {
        if thought {
            self.reasoning.push_str(text);
        } else {
            self.content.push_str(text);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty() && self.reasoning.is_empty()
    }
}

/// What to do with one decoded SSE payload
#[derive(Debug)]
pub enum StreamStep {
    /// Forward the chunk and keep reading
    Emit(ChatStreamResponse),

    /// Forward the chunk, then close the stream
    EmitLast(ChatStreamResponse),

    /// Nothing to forward
    Skip,

    /// Close the stream without forwarding
    Stop,
}

/// Spawn the producer task that maps SSE payloads into normalized chunks.
///
/// The channel closes once: on a terminal step, end of body, an error (sent
/// as the last item), cancellation, or when the receiver is dropped.
pub fn spawn_stream<F>(
    label: String,
    mut events: SseStream,
    cancel: CancelToken,
    mut step: F,
) -> ChatStream
where
    F: FnMut(SseData) -> Result<StreamStep> + Send + 'static,
{
    let (tx, rx) = mpsc::channel(STREAM_BUFFER);

    tokio::spawn(async move {
        let mut forwarded = 0usize;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(instance = %label, "Stream cancelled");
                    break;
                }
                next = events.next() => next,
            };

            let Some(event) = next else {
                break;
            };

            let outcome = event.and_then(&mut step);
            let (chunk, last) = match outcome {
                Ok(StreamStep::Emit(chunk)) => (chunk, false),
                Ok(StreamStep::EmitLast(chunk)) => (chunk, true),
                Ok(StreamStep::Skip) => continue,
                Ok(StreamStep::Stop) => break,
                Err(err) => {
                    debug!(instance = %label, error = %err, "Stream failed");
                    emit(&tx, Err(err), &cancel).await;
                    break;
                }
            };

            if !emit(&tx, Ok(chunk), &cancel).await {
                break;
            }
            forwarded += 1;
            if last {
                break;
            }
        }

        debug!(instance = %label, chunks = forwarded, "Stream closed");
    });

    rx
}

/// Send one item unless the consumer is gone or the request was cancelled
async fn emit(
    tx: &mpsc::Sender<Result<ChatStreamResponse>>,
    item: Result<ChatStreamResponse>,
    cancel: &CancelToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

/// Parse one JSON payload of a stream
pub fn parse_chunk<T: serde::de::DeserializeOwned>(data: &str) -> Result<T> {
    serde_json::from_str(data)
        .map_err(|e| RouterError::Stream(format!("Malformed stream chunk: {}", e)))
}
