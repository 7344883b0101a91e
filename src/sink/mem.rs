use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

use super::{envelope, Envelope, Sink, SinkError};

/// Capturing sink for tests: records every envelope in emit order.
#[derive(Clone, Default)]
pub struct MemSink {
    records: Arc<Mutex<Vec<Envelope>>>,
    fail: Arc<Mutex<bool>>,
}

impl MemSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<Envelope> {
        self.records.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Make subsequent emits fail, for downstream-failure tests.
    pub fn set_fail(&self, fail: bool) {
        *self.fail.lock() = fail;
    }
}

#[async_trait]
impl Sink for MemSink {
    async fn emit(&self, typ: &str, data: serde_json::Value) -> Result<(), SinkError> {
        if *self.fail.lock() {
            return Err(SinkError::Publish("mem sink forced failure".to_string()));
        }
        self.records.lock().push(envelope(typ, data));
        Ok(())
    }
}
