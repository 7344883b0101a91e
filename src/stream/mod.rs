//! Contracts for the upstream partitioned block log and the outbound topic.
//!
//! The real broker lives outside this crate; the pipeline only relies on
//! the properties below: per-partition order, offset-by-timestamp lookup,
//! offset reset within a session, opaque payloads. `MemStream` (tests,
//! demos) and `JsonlBlockStream` (file replay) implement the same contract.

mod jsonl;
mod mem;

use std::fmt;

use async_trait::async_trait;

pub use jsonl::JsonlBlockStream;
pub use mem::{MemProducer, MemStream, MemTopic};

/// One message as delivered by the broker.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    pub partition: i32,
    pub offset: i64,
    pub timestamp_ms: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub enum StreamError {
    Closed,
    Io(std::io::Error),
    Broker(String),
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamError::Closed => write!(f, "stream closed"),
            StreamError::Io(e) => write!(f, "stream io error: {}", e),
            StreamError::Broker(e) => write!(f, "broker error: {}", e),
        }
    }
}

impl std::error::Error for StreamError {}

impl From<std::io::Error> for StreamError {
    fn from(err: std::io::Error) -> Self {
        StreamError::Io(err)
    }
}

/// Consumer-side view of the partitioned block log.
///
/// `next` yields messages in offset order per partition and returns `None`
/// once the stream is closed and drained (the pipeline's shutdown signal).
/// `commit` must only be called after the message is durably spooled.
#[async_trait]
pub trait BlockStream: Send {
    /// Partitions assigned to this session.
    fn assignment(&self) -> Vec<i32>;

    /// Offset of the first message with timestamp >= `ts_ms`, or `None`
    /// when retention no longer reaches back that far.
    async fn offset_for_timestamp(
        &mut self,
        partition: i32,
        ts_ms: i64,
    ) -> Result<Option<i64>, StreamError>;

    async fn earliest_offset(&mut self, partition: i32) -> Result<i64, StreamError>;

    /// Reset the session's read position for one partition.
    async fn seek(&mut self, partition: i32, offset: i64) -> Result<(), StreamError>;

    async fn next(&mut self) -> Result<Option<StreamMessage>, StreamError>;

    async fn commit(&mut self, partition: i32, offset: i64) -> Result<(), StreamError>;
}

/// Producer-side view of the outbound topic.
#[async_trait]
pub trait Producer: Send + Sync {
    async fn publish(&self, payload: &[u8]) -> Result<(), StreamError>;
}
