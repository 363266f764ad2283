//! Progress emitter: the ordered event channel between a pipeline run and its
//! caller, and the newline-delimited JSON encoding used on the wire.

use bytes::Bytes;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tracing::error;

use crate::error::AssessError;
use crate::scoring::Report;

/// Metric name → value. Within a run, keys accumulate and are never removed.
pub type Metrics = serde_json::Map<String, serde_json::Value>;

/// Build a [`Metrics`] map from a JSON object literal; anything else yields
/// an empty map.
pub fn metrics(value: serde_json::Value) -> Metrics {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Metrics::new(),
    }
}

/// One message of a run's event stream.
///
/// Wire shapes, one JSON object per line:
/// - `{"progress": 40, "status": "...", "metrics": {...}}`
/// - `{"metrics": {...}}`
/// - `{"progress": 100, "status": "...", "results": {...report...}}` (terminal)
/// - `{"error": "...", "message": "..."}` (terminal)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Event {
    Final {
        progress: u8,
        status: String,
        results: Box<Report>,
    },
    Progress {
        progress: u8,
        status: String,
        metrics: Metrics,
    },
    Metrics {
        metrics: Metrics,
    },
    Failure {
        error: String,
        message: String,
    },
}

impl Event {
    pub fn failure(err: &AssessError) -> Self {
        Event::Failure {
            error: err.kind().to_string(),
            message: err.to_string(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Event::Final { .. } | Event::Failure { .. })
    }

    pub fn progress(&self) -> Option<u8> {
        match self {
            Event::Final { progress, .. } | Event::Progress { progress, .. } => Some(*progress),
            _ => None,
        }
    }
}

/// Sending half of a run's event channel. Sends are awaited in order, so
/// the caller sees events exactly as the orchestrator produced them.
#[derive(Clone)]
pub struct Emitter {
    tx: mpsc::Sender<Event>,
}

impl Emitter {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, rx)
    }

    /// Fails with [`AssessError::StreamAborted`] once the caller is gone.
    pub async fn send(&self, event: Event) -> Result<(), AssessError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| AssessError::StreamAborted)
    }

    /// Send that waits at most `limit` for buffer space; used on the way out
    /// of a run, when the caller may be reading slowly.
    pub async fn send_within(&self, event: Event, limit: Duration) -> Result<(), AssessError> {
        match tokio::time::timeout(limit, self.send(event)).await {
            Ok(result) => result,
            Err(_) => Err(AssessError::Other(format!(
                "event buffer still full after {:?}",
                limit
            ))),
        }
    }

    /// Resolves when the receiving side has been dropped.
    pub async fn closed(&self) {
        self.tx.closed().await
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Encode one event as a self-contained NDJSON line.
pub fn encode_line(event: &Event) -> Bytes {
    match serde_json::to_vec(event) {
        Ok(mut buf) => {
            buf.push(b'\n');
            Bytes::from(buf)
        }
        Err(e) => {
            error!("Failed to encode event: {}", e);
            let fallback = Event::failure(&AssessError::Other(format!("encoding failed: {}", e)));
            let mut buf = serde_json::to_vec(&fallback).unwrap_or_default();
            buf.push(b'\n');
            Bytes::from(buf)
        }
    }
}

pub fn decode_line(line: &str) -> Result<Event, serde_json::Error> {
    serde_json::from_str(line.trim_end())
}

/// Adapt a run's receiver into a body stream of NDJSON lines.
pub fn ndjson_stream(rx: mpsc::Receiver<Event>) -> impl Stream<Item = Result<Bytes, Infallible>> {
    ReceiverStream::new(rx).map(|event| Ok(encode_line(&event)))
}
