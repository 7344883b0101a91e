//! Outbound sink: typed payloads wrapped in a versioned envelope.
//!
//! Publication is synchronous from the runner's point of view; an error
//! surfaces to the caller and the margin counts as unemitted. The core does
//! not retry; idempotency belongs to the downstream consumer.

mod jsonl;
mod mem;

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::stream::{Producer, StreamError};

pub use jsonl::JsonlSink;
pub use mem::MemSink;

/// Wire envelope for every outbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub typ: String,
    /// Milliseconds since epoch at emit time.
    pub ts: i64,
    pub data: serde_json::Value,
}

/// Periodic window status payload, type tag `win_tick`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinTick {
    pub win_idx: usize,
    pub head: i64,
    pub tail: i64,
    pub open_win: bool,
}

#[derive(Debug)]
pub enum SinkError {
    Serialization(serde_json::Error),
    Io(std::io::Error),
    Publish(String),
}

impl fmt::Display for SinkError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SinkError::Serialization(e) => write!(f, "serialization error: {}", e),
            SinkError::Io(e) => write!(f, "io error: {}", e),
            SinkError::Publish(e) => write!(f, "publish error: {}", e),
        }
    }
}

impl std::error::Error for SinkError {}

impl From<serde_json::Error> for SinkError {
    fn from(err: serde_json::Error) -> Self {
        SinkError::Serialization(err)
    }
}

impl From<std::io::Error> for SinkError {
    fn from(err: std::io::Error) -> Self {
        SinkError::Io(err)
    }
}

impl From<StreamError> for SinkError {
    fn from(err: StreamError) -> Self {
        SinkError::Publish(err.to_string())
    }
}

#[async_trait]
pub trait Sink: Send + Sync {
    async fn emit(&self, typ: &str, data: serde_json::Value) -> Result<(), SinkError>;
}

pub(crate) fn envelope(typ: &str, data: serde_json::Value) -> Envelope {
    Envelope {
        typ: typ.to_string(),
        ts: Utc::now().timestamp_millis(),
        data,
    }
}

/// Sink publishing serialized envelopes on the outbound topic.
pub struct ProducerSink {
    producer: Arc<dyn Producer>,
}

impl ProducerSink {
    pub fn new(producer: Arc<dyn Producer>) -> Self {
        ProducerSink { producer }
    }
}

#[async_trait]
impl Sink for ProducerSink {
    async fn emit(&self, typ: &str, data: serde_json::Value) -> Result<(), SinkError> {
        let env = envelope(typ, data);
        let bytes = serde_json::to_vec(&env)?;
        self.producer.publish(&bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::stream::MemProducer;

    use super::*;

    #[tokio::test]
    async fn test_producer_sink_envelope_shape() {
        let producer = MemProducer::new();
        let sink = ProducerSink::new(Arc::new(producer.clone()));

        let tick = WinTick {
            win_idx: 2,
            head: 10,
            tail: 3,
            open_win: true,
        };
        sink.emit("win_tick", serde_json::to_value(tick).unwrap())
            .await
            .unwrap();

        let records = producer.take();
        assert_eq!(records.len(), 1);
        let env: Envelope = serde_json::from_slice(&records[0]).unwrap();
        assert_eq!(env.typ, "win_tick");
        assert!(env.ts > 0);
        assert_eq!(env.data["win_idx"], 2);
        assert_eq!(env.data["head"], 10);
        assert_eq!(env.data["tail"], 3);
        assert_eq!(env.data["open_win"], true);
    }
}
