//! Durable append-only log of raw block payloads, the ingest crash barrier.
//!
//! Every record is flushed and fsynced before the append returns; only then
//! may the caller commit the upstream offset. The spool is never replayed
//! by this pipeline. It exists so that an acknowledged message survives
//! process death until the replay anchor catches back up.

use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;

pub trait Spool: Send + Sync {
    fn append(&self, partition: i32, offset: i64, raw: &[u8]) -> io::Result<()>;
    fn close(&self) -> io::Result<()>;
}

/// File spool with the record framing
/// `[partition u32 BE | offset u64 BE | len u32 BE | payload]`.
pub struct FileSpool {
    inner: Mutex<BufWriter<File>>,
}

impl FileSpool {
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path.as_ref())?;
        Ok(FileSpool {
            inner: Mutex::new(BufWriter::with_capacity(1 << 20, file)),
        })
    }
}

impl Spool for FileSpool {
    fn append(&self, partition: i32, offset: i64, raw: &[u8]) -> io::Result<()> {
        let mut w = self.inner.lock();

        let mut hdr = [0u8; 4 + 8 + 4];
        hdr[0..4].copy_from_slice(&(partition as u32).to_be_bytes());
        hdr[4..12].copy_from_slice(&(offset as u64).to_be_bytes());
        hdr[12..16].copy_from_slice(&(raw.len() as u32).to_be_bytes());

        w.write_all(&hdr)?;
        w.write_all(raw)?;

        // fsync per record: slow, but this is the barrier that lets the
        // claim loop commit the upstream offset.
        w.flush()?;
        w.get_ref().sync_all()
    }

    fn close(&self) -> io::Result<()> {
        let mut w = self.inner.lock();
        w.flush()?;
        w.get_ref().sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_framing() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.wal");

        let spool = FileSpool::open(&path).unwrap();
        spool.append(3, 42, b"hello").unwrap();
        spool.append(3, 43, b"").unwrap();
        spool.close().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 16 + 5 + 16);

        assert_eq!(&bytes[0..4], &3u32.to_be_bytes());
        assert_eq!(&bytes[4..12], &42u64.to_be_bytes());
        assert_eq!(&bytes[12..16], &5u32.to_be_bytes());
        assert_eq!(&bytes[16..21], b"hello");

        assert_eq!(&bytes[21..25], &3u32.to_be_bytes());
        assert_eq!(&bytes[25..33], &43u64.to_be_bytes());
        assert_eq!(&bytes[33..37], &0u32.to_be_bytes());
    }

    #[test]
    fn test_append_after_reopen_extends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("spool.wal");

        {
            let spool = FileSpool::open(&path).unwrap();
            spool.append(0, 0, b"a").unwrap();
            spool.close().unwrap();
        }
        {
            let spool = FileSpool::open(&path).unwrap();
            spool.append(0, 1, b"b").unwrap();
            spool.close().unwrap();
        }

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 2 * (16 + 1));
    }
}
