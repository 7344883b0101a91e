use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use async_trait::async_trait;

use crate::chain::decode_block;

use super::{BlockStream, StreamError, StreamMessage};

/// File-backed replay topic: one JSON block per line, offset = line number,
/// message timestamp = block header timestamp in milliseconds.
///
/// Used by the runtime binary to drive the pipeline from a captured block
/// feed without a live broker. Single partition; the stream ends at EOF.
pub struct JsonlBlockStream {
    records: Vec<(i64, Vec<u8>)>,
    pos: i64,
    committed: i64,
}

impl JsonlBlockStream {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StreamError> {
        let file = File::open(path.as_ref())?;
        let reader = BufReader::new(file);

        let mut records = Vec::new();
        for (line_no, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let blk = decode_block(line.as_bytes()).map_err(|e| {
                StreamError::Broker(format!("bad block at line {}: {}", line_no + 1, e))
            })?;
            records.push((blk.header.timestamp * 1000, line.into_bytes()));
        }

        log::info!(
            "[replay] loaded {} blocks from {}",
            records.len(),
            path.as_ref().display()
        );
        Ok(JsonlBlockStream {
            records,
            pos: 0,
            committed: -1,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl BlockStream for JsonlBlockStream {
    fn assignment(&self) -> Vec<i32> {
        vec![0]
    }

    async fn offset_for_timestamp(
        &mut self,
        _partition: i32,
        ts_ms: i64,
    ) -> Result<Option<i64>, StreamError> {
        let idx = self.records.partition_point(|(ts, _)| *ts < ts_ms);
        if idx >= self.records.len() {
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
        let idx = self.pos as usize;
        if idx >= self.records.len() {
            return Ok(None);
        }
        let (ts, payload) = self.records[idx].clone();
        self.pos += 1;
        Ok(Some(StreamMessage {
            partition: 0,
            offset: idx as i64,
            timestamp_ms: ts,
            payload,
        }))
    }

    async fn commit(&mut self, _partition: i32, offset: i64) -> Result<(), StreamError> {
        if offset > self.committed {
            self.committed = offset;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use crate::chain::{encode_block, Block, BlockHeader};

    use super::*;

    fn block_line(number: i64, ts: i64) -> String {
        let blk = Block {
            header: BlockHeader {
                number,
                timestamp: ts,
                ..Default::default()
            },
            ..Default::default()
        };
        String::from_utf8(encode_block(&blk).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_replay_order_and_anchor() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        for (n, ts) in [(1, 100i64), (2, 200), (3, 300)] {
            writeln!(f, "{}", block_line(n, ts)).unwrap();
        }
        f.flush().unwrap();

        let mut s = JsonlBlockStream::open(f.path()).unwrap();
        assert_eq!(s.len(), 3);
        assert_eq!(s.offset_for_timestamp(0, 200_000).await.unwrap(), Some(1));
        assert_eq!(s.offset_for_timestamp(0, 300_001).await.unwrap(), None);

        s.seek(0, 1).await.unwrap();
        let m = s.next().await.unwrap().unwrap();
        assert_eq!(m.offset, 1);
        assert_eq!(m.timestamp_ms, 200_000);
        assert_eq!(s.next().await.unwrap().unwrap().offset, 2);
        assert!(s.next().await.unwrap().is_none());
    }

    #[test]
    fn test_open_rejects_garbage_lines() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        writeln!(f, "{}", block_line(1, 100)).unwrap();
        writeln!(f, "not a block").unwrap();
        f.flush().unwrap();
        assert!(JsonlBlockStream::open(f.path()).is_err());
    }
}
