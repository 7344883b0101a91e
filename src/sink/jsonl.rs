use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{envelope, Sink, SinkError};

/// Envelope-per-line file sink for replay runs and local inspection.
pub struct JsonlSink {
    file: Mutex<BufWriter<File>>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(JsonlSink {
            file: Mutex::new(BufWriter::new(file)),
        })
    }
}

#[async_trait]
impl Sink for JsonlSink {
    async fn emit(&self, typ: &str, data: serde_json::Value) -> Result<(), SinkError> {
        let env = envelope(typ, data);
        let line = serde_json::to_string(&env)?;
        let mut file = self.file.lock();
        writeln!(file, "{}", line)?;
        file.flush()?;
        Ok(())
    }
}
