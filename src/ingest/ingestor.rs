use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;

use crate::chain::decode_block;
use crate::dispatch::{DispatchError, Dispatcher, RingLimits, WINDOW_COUNT};
use crate::ready;
use crate::spool::Spool;
use crate::stream::{BlockStream, StreamError};

use super::adapter::BlockAdapter;

/// One message lifted off the consumer session, payload owned.
#[derive(Debug, Clone)]
pub struct RawMsg {
    pub partition: i32,
    pub offset: i64,
    pub payload: Vec<u8>,
}

#[derive(Debug)]
pub enum IngestError {
    Spool(std::io::Error),
    Stream(StreamError),
    Dispatch(DispatchError),
    /// Decode queue or baton ring closed underneath a worker.
    QueueClosed,
    Worker(String),
}

impl fmt::Display for IngestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IngestError::Spool(e) => write!(f, "spool append failed: {}", e),
            IngestError::Stream(e) => write!(f, "stream error: {}", e),
            IngestError::Dispatch(e) => write!(f, "dispatch error: {}", e),
            IngestError::QueueClosed => write!(f, "decode queue closed"),
            IngestError::Worker(e) => write!(f, "decode worker failed: {}", e),
        }
    }
}

impl std::error::Error for IngestError {}

impl From<StreamError> for IngestError {
    fn from(err: StreamError) -> Self {
        IngestError::Stream(err)
    }
}

/// Observable ingest counters, shared with whoever wants to watch.
#[derive(Default)]
pub struct IngestStats {
    pub blocks: AtomicU64,
    pub decode_failures: AtomicU64,
    pub offset_rewinds: AtomicU64,
}

/// Per-block entry of the block-margin ring: the block timestamp and the
/// number of retained transactions that preceded this block. The four
/// window tails walk this ring.
#[derive(Debug, Clone, Copy, Default)]
struct BlockInfo {
    block_ts: i64,
    cumulative_tx: i64,
}

/// State mutated only inside the critical prologue. The baton ring already
/// serializes entry; the mutex makes that exclusivity explicit.
struct MarginState {
    rb_tx_sum: i64,
    block_tail: [i64; WINDOW_COUNT],
    block_info: Vec<BlockInfo>,
}

struct PartitionBase {
    base: i64,
    first_seen: bool,
}

struct Shared {
    adapter: BlockAdapter,
    disp: Dispatcher,
    limits: RingLimits,
    win_secs: [i64; WINDOW_COUNT],
    worker_n: usize,
    emit_parts: usize,

    bases: RwLock<HashMap<i32, PartitionBase>>,
    margin: Mutex<MarginState>,

    // Baton ring: capacity-1 token channels, one lane per worker. A worker
    // processing rel_offset r owns lane r % worker_n; it consumes the lane
    // token, runs its critical section, and passes the token to lane
    // (r + 1) % worker_n. Lane count equals worker count, so two in-flight
    // messages never share a lane and at most one task waits per receiver.
    // Relative offsets must be contiguous from 0 per partition; the token
    // for lane r only ever comes from offset r - 1.
    in_tx: Vec<mpsc::Sender<()>>,
    in_rx: Vec<AsyncMutex<mpsc::Receiver<()>>>,
    out_tx: Vec<mpsc::Sender<()>>,
    out_rx: Vec<AsyncMutex<mpsc::Receiver<()>>>,

    setup_at: Mutex<Option<Instant>>,
    stats: Arc<IngestStats>,
}

/// Turns the partitioned message stream into decoded blocks appended to the
/// dispatcher at strictly monotone transaction indices, plus one margin
/// record per block per window.
///
/// `new` spawns the decode workers; `run` performs session setup (replay
/// anchoring), drives the claim loop until the stream ends, then drains the
/// workers and closes the spool.
pub struct Ingestor {
    shared: Arc<Shared>,
    spool: Arc<dyn Spool>,
    ready_fifo: String,
    raw_tx: mpsc::Sender<RawMsg>,
    workers: Vec<JoinHandle<Result<(), IngestError>>>,
}

impl Ingestor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        adapter: BlockAdapter,
        disp: Dispatcher,
        spool: Arc<dyn Spool>,
        win_secs: [i64; WINDOW_COUNT],
        worker_n: usize,
        queue_cap: usize,
        emit_parts: usize,
        ready_fifo: String,
    ) -> Self {
        let worker_n = if worker_n == 0 { 20 } else { worker_n };
        let queue_cap = if queue_cap == 0 { 1024 } else { queue_cap };

        let limits = disp.limits();

        let mut in_tx = Vec::with_capacity(worker_n);
        let mut in_rx = Vec::with_capacity(worker_n);
        let mut out_tx = Vec::with_capacity(worker_n);
        let mut out_rx = Vec::with_capacity(worker_n);
        for _ in 0..worker_n {
            let (tx, rx) = mpsc::channel(1);
            in_tx.push(tx);
            in_rx.push(AsyncMutex::new(rx));
            let (tx, rx) = mpsc::channel(1);
            out_tx.push(tx);
            out_rx.push(AsyncMutex::new(rx));
        }
        // Seed lane 0: the first relative offset enters without waiting.
        // Fresh capacity-1 channels, the sends cannot fail.
        let _ = in_tx[0].try_send(());
        let _ = out_tx[0].try_send(());

        let shared = Arc::new(Shared {
            adapter,
            disp,
            limits,
            win_secs,
            worker_n,
            emit_parts: emit_parts.max(1),
            bases: RwLock::new(HashMap::new()),
            margin: Mutex::new(MarginState {
                rb_tx_sum: 0,
                block_tail: [0; WINDOW_COUNT],
                block_info: vec![BlockInfo::default(); limits.max_blocks_per_window],
            }),
            in_tx,
            in_rx,
            out_tx,
            out_rx,
            setup_at: Mutex::new(None),
            stats: Arc::new(IngestStats::default()),
        });

        let (raw_tx, raw_rx) = mpsc::channel::<RawMsg>(queue_cap);
        let raw_rx = Arc::new(AsyncMutex::new(raw_rx));

        let workers = (0..worker_n)
            .map(|_| {
                let shared = shared.clone();
                let raw_rx = raw_rx.clone();
                tokio::spawn(decode_loop(shared, raw_rx))
            })
            .collect();

        Ingestor {
            shared,
            spool,
            ready_fifo,
            raw_tx,
            workers,
        }
    }

    pub fn stats(&self) -> Arc<IngestStats> {
        self.shared.stats.clone()
    }

    /// Run one consumer session to completion. Returns once the stream is
    /// closed and every in-flight block has been published, or on the first
    /// fatal error (spool I/O, stream failure, runner gone).
    pub async fn run(self, mut stream: Box<dyn BlockStream>) -> Result<(), IngestError> {
        let session_res = self.session(stream.as_mut()).await;

        let Ingestor {
            spool,
            raw_tx,
            workers,
            ..
        } = self;

        // Close the decode queue; workers drain what is buffered and exit.
        drop(raw_tx);
        let mut worker_err: Option<IngestError> = None;
        for handle in workers {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if worker_err.is_none() {
                        worker_err = Some(e);
                    }
                }
                Err(e) => {
                    if worker_err.is_none() {
                        worker_err = Some(IngestError::Worker(e.to_string()));
                    }
                }
            }
        }

        let close_res = spool.close();

        session_res?;
        if let Some(e) = worker_err {
            return Err(e);
        }
        close_res.map_err(IngestError::Spool)
    }

    async fn session(&self, stream: &mut dyn BlockStream) -> Result<(), IngestError> {
        self.setup(stream).await?;
        self.claim_loop(stream).await
    }

    /// Replay anchoring: reset every assigned partition to the offset of the
    /// first message within the longest window horizon.
    async fn setup(&self, stream: &mut dyn BlockStream) -> Result<(), IngestError> {
        *self.shared.setup_at.lock() = Some(Instant::now());

        let horizon_secs = self.shared.win_secs[WINDOW_COUNT - 1];
        let target_ms = Utc::now().timestamp_millis() - horizon_secs * 1000;

        let parts = stream.assignment();
        log::info!(
            "[ingest][setup] partitions={:?} target_ms={} horizon_s={}",
            parts,
            target_ms,
            horizon_secs
        );
        if parts.len() > 1 {
            // The ring geometry and index assignment assume one totally
            // ordered stream; more than one partition runs degraded.
            log::warn!(
                "[ingest][setup] {} partitions assigned; window/ring logic assumes a single ordered stream",
                parts.len()
            );
        }

        for p in parts {
            let t0 = Instant::now();
            let off = match stream.offset_for_timestamp(p, target_ms).await? {
                Some(off) => off,
                None => {
                    let earliest = stream.earliest_offset(p).await?;
                    log::warn!(
                        "[ingest][setup] retention short of horizon: p={} using earliest={}",
                        p,
                        earliest
                    );
                    earliest
                }
            };
            log::info!(
                "[ingest][setup] reset offset: p={} off={} (t={}ms) cost={:?}",
                p,
                off,
                target_ms,
                t0.elapsed()
            );
            self.shared.bases.write().insert(
                p,
                PartitionBase {
                    base: off.max(0),
                    first_seen: false,
                },
            );
            stream.seek(p, off).await?;
        }

        if !self.ready_fifo.is_empty() {
            let path = self.ready_fifo.clone();
            log::info!("[ready] session established, signaling fifo={}", path);
            tokio::spawn(async move {
                ready::signal_fifo(&path, "READY\n", Duration::from_secs(8)).await;
            });
        }

        Ok(())
    }

    /// Barrier + commit + hand-off only; no window or graph math here.
    async fn claim_loop(&self, stream: &mut dyn BlockStream) -> Result<(), IngestError> {
        while let Some(msg) = stream.next().await? {
            // Spool first: the fsync is what makes the commit safe.
            self.spool
                .append(msg.partition, msg.offset, &msg.payload)
                .map_err(IngestError::Spool)?;
            stream.commit(msg.partition, msg.offset).await?;

            let raw = RawMsg {
                partition: msg.partition,
                offset: msg.offset,
                payload: msg.payload,
            };
            // Blocking push: explicit backpressure toward the broker.
            if self.raw_tx.send(raw).await.is_err() {
                return Err(IngestError::QueueClosed);
            }
        }
        Ok(())
    }
}

async fn decode_loop(
    shared: Arc<Shared>,
    raw_rx: Arc<AsyncMutex<mpsc::Receiver<RawMsg>>>,
) -> Result<(), IngestError> {
    loop {
        let raw = {
            let mut rx = raw_rx.lock().await;
            rx.recv().await
        };
        let Some(raw) = raw else {
            return Ok(());
        };
        process_msg(&shared, raw).await?;
    }
}

async fn process_msg(shared: &Shared, raw: RawMsg) -> Result<(), IngestError> {
    let base = base_or_init(shared, raw.partition, raw.offset);
    mark_first_seen(shared, raw.partition, raw.offset, base);

    let rel_offset = raw.offset - base;
    if rel_offset < 0 {
        // Base mis-set or offset rewind. The message is outside the ordered
        // sequence the baton ring tracks, so it is skipped without touching
        // the batons.
        shared.stats.offset_rewinds.fetch_add(1, Ordering::Relaxed);
        log::warn!(
            "[ingest] rel_offset<0: p={} off={} base={} rel={}",
            raw.partition,
            raw.offset,
            base,
            rel_offset
        );
        return Ok(());
    }

    let lane = (rel_offset as usize) % shared.worker_n;
    let next_lane = ((rel_offset + 1) as usize) % shared.worker_n;

    let decoded = match decode_block(&raw.payload) {
        Ok(blk) => Some(blk),
        Err(e) => {
            shared.stats.decode_failures.fetch_add(1, Ordering::Relaxed);
            log::warn!(
                "[ingest] decode block failed: p={} off={} err={}",
                raw.partition,
                raw.offset,
                e
            );
            None
        }
    };

    let Some(blk) = decoded else {
        // The slot in the order ring still has to be crossed, or every
        // later offset on this partition would wait forever.
        pass_baton(&shared.in_rx[lane], &shared.in_tx[next_lane]).await?;
        pass_baton(&shared.out_rx[lane], &shared.out_tx[next_lane]).await?;
        return Ok(());
    };

    // Interning and filtering are order-free; only the index bookkeeping
    // below needs the baton.
    let events = shared.adapter.project_block(&blk);
    let retained = events.len() as i64;

    // ---- critical prologue, strict offset order ----
    recv_baton(&shared.in_rx[lane]).await?;
    let (base_idx, tx_tail, tx_head, open_win) = {
        let mut st = shared.margin.lock();
        let n = shared.limits.max_blocks_per_window;
        let rel_idx = (rel_offset as usize) % n;

        let base_idx = st.rb_tx_sum;
        st.rb_tx_sum += retained;
        st.block_info[rel_idx] = BlockInfo {
            block_ts: blk.header.timestamp,
            cumulative_tx: base_idx,
        };

        let mut open_win = false;
        for w in 0..WINDOW_COUNT {
            let mut tail = st.block_tail[w];
            while blk.header.timestamp - st.block_info[(tail as usize) % n].block_ts
                > shared.win_secs[w]
            {
                tail += 1;
            }
            st.block_tail[w] = tail;
            if w == WINDOW_COUNT - 1 {
                // Only the longest horizon gates the global latch.
                open_win = tail != 0;
            }
        }

        let mut tx_tail = [0i64; WINDOW_COUNT];
        for w in 0..WINDOW_COUNT {
            tx_tail[w] = st.block_info[(st.block_tail[w] as usize) % n].cumulative_tx;
        }

        (base_idx, tx_tail, st.rb_tx_sum, open_win)
    };
    send_baton(&shared.in_tx[next_lane]).await?;

    // ---- parallel section: ring writes at disjoint indices ----
    shared
        .adapter
        .emit_chunked(&events, base_idx, shared.emit_parts, |ev, idx| {
            shared.disp.append(ev, idx)
        });

    // ---- critical epilogue, strict offset order ----
    recv_baton(&shared.out_rx[lane]).await?;
    let move_res = shared.disp.win_move(&tx_tail, tx_head, open_win).await;

    shared.stats.blocks.fetch_add(1, Ordering::Relaxed);
    if rel_offset % 100 == 0 {
        log::info!(
            "[ingest] p={} off={} base={} rel={} blk={} tx={} head={}",
            raw.partition,
            raw.offset,
            base,
            rel_offset,
            blk.header.number,
            retained,
            tx_head
        );
    }

    // Pass the baton even on failure so peers tear down at win_move instead
    // of deadlocking on the lane.
    send_baton(&shared.out_tx[next_lane]).await?;
    move_res.map_err(IngestError::Dispatch)
}

async fn recv_baton(rx: &AsyncMutex<mpsc::Receiver<()>>) -> Result<(), IngestError> {
    match rx.lock().await.recv().await {
        Some(()) => Ok(()),
        None => Err(IngestError::QueueClosed),
    }
}

async fn send_baton(tx: &mpsc::Sender<()>) -> Result<(), IngestError> {
    tx.send(()).await.map_err(|_| IngestError::QueueClosed)
}

async fn pass_baton(
    rx: &AsyncMutex<mpsc::Receiver<()>>,
    tx: &mpsc::Sender<()>,
) -> Result<(), IngestError> {
    recv_baton(rx).await?;
    send_baton(tx).await
}

fn base_or_init(shared: &Shared, partition: i32, offset: i64) -> i64 {
    if let Some(pb) = shared.bases.read().get(&partition) {
        return pb.base;
    }
    // Should not happen once setup ran and the seek succeeded; init from
    // the first sighting to keep rel_offset non-negative.
    let mut bases = shared.bases.write();
    let pb = bases.entry(partition).or_insert_with(|| {
        log::warn!(
            "[ingest] missing base offset, init from first seen: p={} base={}",
            partition,
            offset
        );
        PartitionBase {
            base: offset,
            first_seen: false,
        }
    });
    pb.base
}

fn mark_first_seen(shared: &Shared, partition: i32, offset: i64, base: i64) {
    {
        let bases = shared.bases.read();
        match bases.get(&partition) {
            Some(pb) if !pb.first_seen => {}
            _ => return,
        }
    }
    let mut bases = shared.bases.write();
    let Some(pb) = bases.get_mut(&partition) else {
        return;
    };
    if pb.first_seen {
        return;
    }
    pb.first_seen = true;

    let since_setup = shared
        .setup_at
        .lock()
        .as_ref()
        .map(|t| t.elapsed())
        .unwrap_or_default();
    log::info!(
        "[ingest] first_msg: p={} off={} base={} rel={} since_setup={:?}",
        partition,
        offset,
        base,
        offset - base,
        since_setup
    );
}
