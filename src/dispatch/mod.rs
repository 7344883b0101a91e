//! Event ring and per-window margin fan-out.
//!
//! The dispatcher owns the shared event log plus the four bounded margin
//! channels feeding the window runners. A full margin channel blocks
//! `win_move`, which is the backpressure signal from a slow runner back to
//! the ingest lane.

mod ring;

use std::fmt;
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::event::TxEvent;

pub use ring::EventRing;

pub const MAX_BLOCKS_PER_WINDOW: usize = 172_800;
pub const MAX_TX_PER_BLOCK: usize = 100;

/// Number of concurrent window horizons.
pub const WINDOW_COUNT: usize = 4;

/// Ring geometry. The defaults match the operating assumption that the
/// longest window never holds more than 172,800 blocks of 100 transactions;
/// tests shrink them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingLimits {
    pub max_blocks_per_window: usize,
    pub max_tx_per_block: usize,
}

impl Default for RingLimits {
    fn default() -> Self {
        RingLimits {
            max_blocks_per_window: MAX_BLOCKS_PER_WINDOW,
            max_tx_per_block: MAX_TX_PER_BLOCK,
        }
    }
}

impl RingLimits {
    pub fn cap_events(&self) -> usize {
        self.max_blocks_per_window * self.max_tx_per_block
    }
}

/// One margin record, published once per block per window.
///
/// `tx_head` is the exclusive upper bound of newly appended events,
/// `tx_tail` the new exclusive lower bound of events still inside the
/// window horizon. Both are monotone non-decreasing per channel and
/// `tx_tail <= tx_head` always. `open_win` latches true once the longest
/// horizon has enough history for its tail to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxMargin {
    pub tx_head: i64,
    pub tx_tail: i64,
    pub open_win: bool,
}

#[derive(Debug)]
pub enum DispatchError {
    /// A window runner dropped its margin receiver (halted).
    RunnerGone(usize),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::RunnerGone(i) => write!(f, "window runner {} is gone", i),
        }
    }
}

impl std::error::Error for DispatchError {}

pub struct Dispatcher {
    ring: Arc<EventRing>,
    limits: RingLimits,
    margin_tx: Vec<mpsc::Sender<TxMargin>>,
}

impl Dispatcher {
    /// Build the dispatcher plus the four margin receivers, in window order
    /// (shortest horizon first). Receivers are handed out exactly once.
    pub fn new(limits: RingLimits, margin_cap: usize) -> (Self, Vec<mpsc::Receiver<TxMargin>>) {
        let margin_cap = if margin_cap == 0 { 16 } else { margin_cap };
        let mut senders = Vec::with_capacity(WINDOW_COUNT);
        let mut receivers = Vec::with_capacity(WINDOW_COUNT);
        for _ in 0..WINDOW_COUNT {
            let (tx, rx) = mpsc::channel(margin_cap);
            senders.push(tx);
            receivers.push(rx);
        }
        let disp = Dispatcher {
            ring: Arc::new(EventRing::new(limits.cap_events())),
            limits,
            margin_tx: senders,
        };
        (disp, receivers)
    }

    pub fn limits(&self) -> RingLimits {
        self.limits
    }

    /// Shared handle to the event log; window runners read through it.
    pub fn ring(&self) -> Arc<EventRing> {
        self.ring.clone()
    }

    pub fn append(&self, ev: TxEvent, idx: i64) {
        self.ring.append(ev, idx);
    }

    pub fn get(&self, idx: i64) -> TxEvent {
        self.ring.get(idx)
    }

    /// Fan out one margin record per window. Blocks while a channel is
    /// full; fails only when a runner has halted.
    pub async fn win_move(
        &self,
        tails: &[i64; WINDOW_COUNT],
        head: i64,
        open_win: bool,
    ) -> Result<(), DispatchError> {
        for (i, tx) in self.margin_tx.iter().enumerate() {
            let mv = TxMargin {
                tx_head: head,
                tx_tail: tails[i],
                open_win,
            };
            tx.send(mv).await.map_err(|_| DispatchError::RunnerGone(i))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_win_move_fans_out_per_window_tails() {
        let limits = RingLimits {
            max_blocks_per_window: 8,
            max_tx_per_block: 2,
        };
        let (disp, mut rxs) = Dispatcher::new(limits, 4);

        disp.win_move(&[5, 3, 1, 0], 9, true).await.unwrap();

        for (i, want_tail) in [5i64, 3, 1, 0].iter().enumerate() {
            let mv = rxs[i].recv().await.unwrap();
            assert_eq!(mv.tx_head, 9);
            assert_eq!(mv.tx_tail, *want_tail);
            assert!(mv.open_win);
        }
    }

    #[tokio::test]
    async fn test_win_move_fails_when_runner_gone() {
        let limits = RingLimits {
            max_blocks_per_window: 8,
            max_tx_per_block: 2,
        };
        let (disp, mut rxs) = Dispatcher::new(limits, 4);
        rxs.remove(2); // runner 2 halts

        let err = disp.win_move(&[0, 0, 0, 0], 1, false).await.unwrap_err();
        assert!(matches!(err, DispatchError::RunnerGone(2)));
        // Channels 0 and 1 were served before the failure.
        assert!(rxs[0].try_recv().is_ok());
    }
}
