//! Whole-pipeline runs: MemStream in, MemSink out, real spool on disk.

use std::sync::Arc;

use chrono::Utc;

use blockflow::chain::{encode_block, Block, BlockHeader, Tx, TxBody};
use blockflow::config::Config;
use blockflow::dispatch::RingLimits;
use blockflow::pipeline::Pipeline;
use blockflow::sink::MemSink;
use blockflow::stream::{MemStream, MemTopic};

fn addr(n: u64) -> String {
    format!("0x{:040x}", n)
}

fn block(number: i64, ts: i64, transfers: &[(u64, u64)]) -> Vec<u8> {
    let txs = transfers
        .iter()
        .map(|&(f, t)| Tx {
            tx_body: TxBody {
                from: addr(f),
                to: addr(t),
                token: "T".to_string(),
                amount: 10,
                timestamp: ts,
                nonce: 0,
            },
            ..Default::default()
        })
        .collect();
    let blk = Block {
        header: BlockHeader {
            number,
            timestamp: ts,
            ..Default::default()
        },
        txs,
        ..Default::default()
    };
    encode_block(&blk).unwrap()
}

fn test_config(spool_path: &str) -> Config {
    Config {
        spool_path: spool_path.to_string(),
        ready_fifo: String::new(),
        decode_workers: 4,
        decode_queue: 64,
        margin_channel: 16,
        emit_every: [1, 1, 1, 1],
        ..Config::default()
    }
}

fn small_limits() -> RingLimits {
    RingLimits {
        max_blocks_per_window: 512,
        max_tx_per_block: 4,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_latch_activation_enables_ticks() {
    // 100 blocks, 1000 s apart: the day window's tail first moves at the
    // block whose timestamp exceeds the oldest by more than 86400 s
    // (t=87000, margin index 87).
    let topic = MemTopic::new();
    let now = Utc::now().timestamp_millis();
    for i in 0..100i64 {
        topic.push(now, block(i, i * 1000, &[(1, 2)]));
    }
    topic.close();

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path().join("spool.wal").to_str().unwrap());
    let sink = MemSink::new();

    let handle = Pipeline::start(
        &cfg,
        small_limits(),
        Box::new(MemStream::new(topic)),
        Arc::new(sink.clone()),
    )
    .unwrap();

    handle.join().await.unwrap();

    // The latch opened exactly once the horizon filled.
    let records = sink.records();
    assert!(!records.is_empty());

    // The longest window emits margins 87..=99 and nothing earlier.
    let win3_heads: Vec<i64> = records
        .iter()
        .filter(|r| r.data["win_idx"] == 3)
        .map(|r| r.data["head"].as_i64().unwrap())
        .collect();
    assert_eq!(win3_heads, (88..=100).collect::<Vec<i64>>());

    // The longest window's ticks all carry the open flag. Shorter windows
    // may legitimately flush a few pre-latch margins right after the latch
    // rises, so only shape is asserted for them.
    for r in &records {
        assert_eq!(r.typ, "win_tick");
        if r.data["win_idx"] == 3 {
            assert_eq!(r.data["open_win"], true);
        }
        let head = r.data["head"].as_i64().unwrap();
        let tail = r.data["tail"].as_i64().unwrap();
        assert!(tail <= head);
        assert!(head >= 1 && head <= 100);
    }

    // Per window, emitted heads are strictly increasing (margin order is
    // preserved end to end).
    for w in 0..4u64 {
        let heads: Vec<i64> = records
            .iter()
            .filter(|r| r.data["win_idx"] == w)
            .map(|r| r.data["head"].as_i64().unwrap())
            .collect();
        for pair in heads.windows(2) {
            assert!(pair[0] < pair[1]);
        }
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_no_emission_when_all_blocks_fit_shortest_window() {
    // Everything within 60 s: the day window never trims, the latch stays
    // down, no tick leaves the pipeline.
    let topic = MemTopic::new();
    let now = Utc::now().timestamp_millis();
    for i in 0..50i64 {
        topic.push(now, block(i, 100 + i, &[(1, 2)]));
    }
    topic.close();

    let dir = tempfile::tempdir().unwrap();
    let cfg = test_config(dir.path().join("spool.wal").to_str().unwrap());
    let sink = MemSink::new();

    let handle = Pipeline::start(
        &cfg,
        small_limits(),
        Box::new(MemStream::new(topic)),
        Arc::new(sink.clone()),
    )
    .unwrap();
    handle.join().await.unwrap();

    assert!(sink.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_committed_message_is_spooled() {
    let topic = MemTopic::new();
    let now = Utc::now().timestamp_millis();
    let payloads: Vec<Vec<u8>> = (0..10i64).map(|i| block(i, 100 + i, &[(1, 2)])).collect();
    for p in &payloads {
        topic.push(now, p.clone());
    }
    topic.close();

    let dir = tempfile::tempdir().unwrap();
    let spool_path = dir.path().join("spool.wal");
    let cfg = test_config(spool_path.to_str().unwrap());
    let sink = MemSink::new();

    let handle = Pipeline::start(
        &cfg,
        small_limits(),
        Box::new(MemStream::new(topic)),
        Arc::new(sink),
    )
    .unwrap();
    handle.join().await.unwrap();

    // Walk the spool frames: every consumed offset is durably present, in
    // order, bytes intact.
    let bytes = std::fs::read(&spool_path).unwrap();
    let mut at = 0usize;
    let mut offsets = Vec::new();
    while at < bytes.len() {
        let partition = u32::from_be_bytes(bytes[at..at + 4].try_into().unwrap());
        let offset = u64::from_be_bytes(bytes[at + 4..at + 12].try_into().unwrap());
        let len = u32::from_be_bytes(bytes[at + 12..at + 16].try_into().unwrap()) as usize;
        let payload = &bytes[at + 16..at + 16 + len];
        assert_eq!(partition, 0);
        assert_eq!(payload, &payloads[offset as usize][..]);
        offsets.push(offset);
        at += 16 + len;
    }
    assert_eq!(offsets, (0..10u64).collect::<Vec<u64>>());
}
