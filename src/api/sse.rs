//! Server-Sent Events encoding for normalized chat streams.

use crate::api::streaming::ChatStream;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Interval between heartbeat events while a stream is idle.
pub const DEFAULT_HEARTBEAT: Duration = Duration::from_secs(15);

const EVENT_BUFFER: usize = 100;

/// One server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    /// Event type; `None` is the default `message` event
    pub event: Option<String>,

    /// Event payload
    pub data: String,
}

impl Event {
    /// A default-typed event carrying `value` as JSON
    pub fn json<T: Serialize>(value: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: None,
            data: serde_json::to_string(value)?,
        })
    }

    /// A named event carrying `value` as JSON
    pub fn named<T: Serialize>(event: &str, value: &T) -> serde_json::Result<Self> {
        Ok(Self {
            event: Some(event.to_string()),
            data: serde_json::to_string(value)?,
        })
    }

    /// Empty keep-alive event
    pub fn heartbeat() -> Self {
        Self {
            event: Some("heartbeat".to_string()),
            data: String::new(),
        }
    }
}

impl fmt::Display for Event {
    /// Wire format, terminated by a blank line
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(event) = &self.event {
            writeln!(f, "event:{}", event)?;
        }
        if self.data.is_empty() {
            writeln!(f, "data:")?;
        } else {
            for line in self.data.lines() {
                writeln!(f, "data:{}", line)?;
            }
        }
        writeln!(f)
    }
}

#[derive(Serialize)]
struct ErrorPayload {
    error: String,
}

/// Re-encode a chat stream as SSE events, interleaving heartbeats.
///
/// The returned channel closes after the upstream stream closes. An upstream
/// error becomes a final `error` event.
pub fn encode_stream(mut stream: ChatStream, heartbeat: Duration) -> mpsc::Receiver<Event> {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + heartbeat, heartbeat);

        loop {
            let event = tokio::select! {
                item = stream.recv() => match item {
                    Some(Ok(chunk)) => match Event::json(&chunk) {
                        Ok(event) => event,
                        Err(e) => {
                            warn!(error = %e, "Dropping chunk that failed to serialize");
                            continue;
                        }
                    },
                    Some(Err(err)) => {
                        let payload = ErrorPayload { error: err.to_string() };
                        match Event::named("error", &payload) {
                            Ok(event) => event,
                            Err(_) => break,
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => Event::heartbeat(),
            };

            if tx.send(event).await.is_err() {
                debug!("SSE consumer went away");
                break;
            }
        }
    });

    rx
}
