//! Assembles the full ingest-to-window pipeline.
//!
//! ```text
//! BlockStream
//!     |            claim loop: spool -> commit -> decode queue
//! Ingestor (W decode workers, baton-ordered)
//!     |            append(ev, idx) + win_move per block
//! Dispatcher (event ring + 4 margin channels)
//!     |
//! 4 x Runner (window graphs, latch-gated strategies)
//!     |
//! Sink
//! ```
//!
//! Shutdown is source-driven: when the stream ends, the ingest lane drains,
//! the dispatcher drops, margin channels close and the runners exit.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::task::JoinHandle;

use crate::config::Config;
use crate::dispatch::{Dispatcher, RingLimits, WINDOW_COUNT};
use crate::ids::{AddressInterner, TokenInterner};
use crate::ingest::{BlockAdapter, IngestError, IngestStats, Ingestor};
use crate::sink::Sink;
use crate::spool::{FileSpool, Spool};
use crate::stream::BlockStream;
use crate::window::{EmitTick, Runner, RunnerError, Strategy};

#[derive(Debug)]
pub enum PipelineError {
    Spool(std::io::Error),
    Ingest(IngestError),
    Runner(RunnerError),
    Join(String),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::Spool(e) => write!(f, "spool open failed: {}", e),
            PipelineError::Ingest(e) => write!(f, "ingest failed: {}", e),
            PipelineError::Runner(e) => write!(f, "window runner failed: {}", e),
            PipelineError::Join(e) => write!(f, "task join failed: {}", e),
        }
    }
}

impl std::error::Error for PipelineError {}

pub struct Pipeline;

impl Pipeline {
    /// Wire everything and start the tasks. Must run inside a tokio
    /// runtime. `limits` controls the ring geometry; production uses
    /// `RingLimits::default()`, tests shrink it.
    pub fn start(
        cfg: &Config,
        limits: RingLimits,
        stream: Box<dyn BlockStream>,
        sink: Arc<dyn Sink>,
    ) -> Result<PipelineHandle, PipelineError> {
        let spool: Arc<dyn Spool> =
            Arc::new(FileSpool::open(&cfg.spool_path).map_err(PipelineError::Spool)?);
        Self::start_with_spool(cfg, limits, stream, sink, spool)
    }

    /// Same as `start`, with a caller-provided spool.
    pub fn start_with_spool(
        cfg: &Config,
        limits: RingLimits,
        stream: Box<dyn BlockStream>,
        sink: Arc<dyn Sink>,
        spool: Arc<dyn Spool>,
    ) -> Result<PipelineHandle, PipelineError> {
        let addrs = Arc::new(AddressInterner::new(cfg.addr_shards, 1024));
        let tokens = Arc::new(TokenInterner::new(cfg.token_shards, 64));

        let mut adapter = BlockAdapter::new(addrs.clone(), tokens.clone());
        adapter.drop_bad_addr = cfg.drop_bad_addr;
        adapter.drop_no_token = cfg.drop_no_token;

        let (disp, margin_rxs) = Dispatcher::new(limits, cfg.margin_channel);
        let ring = disp.ring();
        let latch = Arc::new(AtomicBool::new(false));

        let mut runners = Vec::with_capacity(WINDOW_COUNT);
        for (win_idx, rx) in margin_rxs.into_iter().enumerate() {
            let strategies: Vec<Box<dyn Strategy>> =
                vec![Box::new(EmitTick::new(cfg.emit_every[win_idx]))];
            let runner = Runner::new(
                win_idx,
                ring.clone(),
                rx,
                sink.clone(),
                latch.clone(),
                win_idx == WINDOW_COUNT - 1,
                strategies,
            );
            runners.push(tokio::spawn(runner.run()));
        }

        let ingestor = Ingestor::new(
            adapter,
            disp,
            spool,
            cfg.win_secs,
            cfg.decode_workers,
            cfg.decode_queue,
            cfg.emit_parts,
            cfg.ready_fifo.clone(),
        );
        let stats = ingestor.stats();
        let ingest = tokio::spawn(ingestor.run(stream));

        Ok(PipelineHandle {
            ingest,
            runners,
            stats,
            latch,
        })
    }
}

pub struct PipelineHandle {
    ingest: JoinHandle<Result<(), IngestError>>,
    runners: Vec<JoinHandle<Result<(), RunnerError>>>,
    stats: Arc<IngestStats>,
    latch: Arc<AtomicBool>,
}

impl PipelineHandle {
    pub fn stats(&self) -> Arc<IngestStats> {
        self.stats.clone()
    }

    /// Whether the global open-window latch has been raised.
    pub fn window_open(&self) -> bool {
        self.latch.load(Ordering::Acquire)
    }

    /// Wait for the whole pipeline to finish; first failure wins.
    pub async fn join(self) -> Result<(), PipelineError> {
        let ingest_res = match self.ingest.await {
            Ok(res) => res.map_err(PipelineError::Ingest),
            Err(e) => Err(PipelineError::Join(e.to_string())),
        };

        let mut runner_err: Option<PipelineError> = None;
        for handle in self.runners {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    if runner_err.is_none() {
                        runner_err = Some(PipelineError::Runner(e));
                    }
                }
                Err(e) => {
                    if runner_err.is_none() {
                        runner_err = Some(PipelineError::Join(e.to_string()));
                    }
                }
            }
        }

        // A runner halt also fails the ingest lane (win_move to a gone
        // runner); report the runner's own error as the root cause.
        if let Some(e) = runner_err {
            return Err(e);
        }
        ingest_res
    }

    /// Hard stop: abort every task. State is lost; restart replays from
    /// the anchor.
    pub fn abort(self) {
        self.ingest.abort();
        for handle in &self.runners {
            handle.abort();
        }
    }
}
