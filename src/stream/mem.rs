use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use super::{BlockStream, Producer, StreamError, StreamMessage};

/// In-memory single-partition topic shared between a producing side (test
/// driver, demo generator) and a `MemStream` consumer session.
///
/// Records are `(timestamp_ms, payload)` appended in offset order; offsets
/// are record indices.
#[derive(Clone)]
pub struct MemTopic {
    inner: Arc<TopicInner>,
}

struct TopicInner {
    records: Mutex<Vec<(i64, Vec<u8>)>>,
    closed: AtomicBool,
    notify: Notify,
}

impl MemTopic {
    pub fn new() -> Self {
        MemTopic {
            inner: Arc::new(TopicInner {
                records: Mutex::new(Vec::new()),
                closed: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    pub fn push(&self, timestamp_ms: i64, payload: Vec<u8>) {
        self.inner.records.lock().push((timestamp_ms, payload));
        // notify_one stores a permit when no consumer is parked, so a push
        // racing the consumer's empty-check is never lost.
        self.inner.notify.notify_one();
    }

    /// Close the topic: consumers drain what is buffered, then see end of
    /// stream. This is the test-side stand-in for session cancellation.
    pub fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }

    pub fn len(&self) -> usize {
        self.inner.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for MemTopic {
    fn default() -> Self {
        Self::new()
    }
}

/// Consumer session over a `MemTopic`. Single partition (partition 0),
/// matching the ordering core's single-stream assumption.
pub struct MemStream {
    topic: MemTopic,
    partition: i32,
    pos: i64,
    committed: i64,
}

impl MemStream {
    pub fn new(topic: MemTopic) -> Self {
        MemStream {
            topic,
            partition: 0,
            pos: 0,
            committed: -1,
        }
    }

    pub fn committed(&self) -> i64 {
        self.committed
    }
}

#[async_trait]
impl BlockStream for MemStream {
    fn assignment(&self) -> Vec<i32> {
        vec![self.partition]
    }

    async fn offset_for_timestamp(
        &mut self,
        _partition: i32,
        ts_ms: i64,
    ) -> Result<Option<i64>, StreamError> {
        let records = self.topic.inner.records.lock();
        let idx = records.partition_point(|(ts, _)| *ts < ts_ms);
        if idx >= records.len() {
            return Ok(None);
        }
        Ok(Some(idx as i64))
    }

    async fn earliest_offset(&mut self, _partition: i32) -> Result<i64, StreamError> {
        Ok(0)
    }

    async fn seek(&mut self, _partition: i32, offset: i64) -> Result<(), StreamError> {
        self.pos = offset.max(0);
        Ok(())
    }

    async fn next(&mut self) -> Result<Option<StreamMessage>, StreamError> {
        loop {
            {
                let records = self.topic.inner.records.lock();
                if (self.pos as usize) < records.len() {
                    let (ts, payload) = records[self.pos as usize].clone();
                    let msg = StreamMessage {
                        partition: self.partition,
                        offset: self.pos,
                        timestamp_ms: ts,
                        payload,
                    };
                    self.pos += 1;
                    return Ok(Some(msg));
                }
                if self.topic.inner.closed.load(Ordering::Acquire) {
                    return Ok(None);
                }
            }
            self.topic.inner.notify.notified().await;
        }
    }

    async fn commit(&mut self, _partition: i32, offset: i64) -> Result<(), StreamError> {
        if offset > self.committed {
            self.committed = offset;
        }
        Ok(())
    }
}

/// Capturing producer for the outbound topic.
#[derive(Clone, Default)]
pub struct MemProducer {
    records: Arc<Mutex<Vec<Vec<u8>>>>,
}

impl MemProducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn take(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.records.lock())
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl Producer for MemProducer {
    async fn publish(&self, payload: &[u8]) -> Result<(), StreamError> {
        self.records.lock().push(payload.to_vec());
        Ok(())
    }
}
