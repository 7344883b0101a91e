use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::dispatch::{EventRing, TxMargin};
use crate::sink::Sink;

use super::queue::IdxQueue;
use super::strategy::{Strategy, WindowSnapshot};

/// Runner lifecycle: PRIMING until the longest window raises the shared
/// latch, ACTIVE from then on. The transition is one-way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WinState {
    Priming,
    Active,
}

#[derive(Debug)]
pub enum RunnerError {
    /// An evidence queue front did not match the index being retired and
    /// the defensive resync could not repair it. Unreachable while the
    /// margin invariants hold; halting surfaces the bug.
    EvidenceDesync {
        win_idx: usize,
        edge: u64,
        want: i64,
    },
    /// The window horizon outgrew the event ring: a slot this runner still
    /// needs has been reclaimed by a writer.
    RingOverrun {
        win_idx: usize,
        tail: i64,
        head: i64,
        capacity: usize,
    },
}

impl fmt::Display for RunnerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunnerError::EvidenceDesync { win_idx, edge, want } => write!(
                f,
                "win {}: evidence desync on edge {:#x}, want idx {}",
                win_idx, edge, want
            ),
            RunnerError::RingOverrun {
                win_idx,
                tail,
                head,
                capacity,
            } => write!(
                f,
                "win {}: ring overrun, tail={} head={} capacity={}",
                win_idx, tail, head, capacity
            ),
        }
    }
}

impl std::error::Error for RunnerError {}

fn edge_key(from: u32, to: u32) -> u64 {
    ((from as u64) << 32) | to as u64
}

/// One sliding-window analyzer: a directed simple graph of transfer edges
/// alive inside the window, plus per-edge FIFO evidence of contributing
/// transaction indices.
///
/// Margins must be applied in channel order; `run` does exactly that.
pub struct Runner {
    win_idx: usize,
    ring: Arc<EventRing>,
    margin_rx: mpsc::Receiver<TxMargin>,
    sink: Arc<dyn Sink>,
    strategies: Vec<Box<dyn Strategy>>,

    head: i64,
    tail: i64,

    adj: HashMap<u32, HashSet<u32>>,
    rev: HashMap<u32, HashSet<u32>>,
    evidence: HashMap<u64, IdxQueue>,

    /// Shared across all runners; only the longest window writes it.
    all_open: Arc<AtomicBool>,
    is_max: bool,

    emit_failures: u64,
}

impl Runner {
    pub fn new(
        win_idx: usize,
        ring: Arc<EventRing>,
        margin_rx: mpsc::Receiver<TxMargin>,
        sink: Arc<dyn Sink>,
        all_open: Arc<AtomicBool>,
        is_max: bool,
        strategies: Vec<Box<dyn Strategy>>,
    ) -> Self {
        Runner {
            win_idx,
            ring,
            margin_rx,
            sink,
            strategies,
            head: 0,
            tail: 0,
            adj: HashMap::new(),
            rev: HashMap::new(),
            evidence: HashMap::new(),
            all_open,
            is_max,
            emit_failures: 0,
        }
    }

    /// Consume margins until the channel closes (clean shutdown) or a
    /// correctness violation halts this runner.
    pub async fn run(mut self) -> Result<(), RunnerError> {
        while let Some(mv) = self.margin_rx.recv().await {
            self.handle_move(&mv).await?;
        }
        log::info!(
            "[win {}] margin channel closed, exiting: head={} tail={} edges={}",
            self.win_idx,
            self.head,
            self.tail,
            self.evidence.len()
        );
        Ok(())
    }

    /// Apply one margin: grow to `tx_head`, shrink to `tx_tail`, raise the
    /// latch if this is the longest window, then run strategies when open.
    pub async fn handle_move(&mut self, mv: &TxMargin) -> Result<(), RunnerError> {
        // A reclaimed slot inside [tail, tx_head) would be silent data
        // corruption, so check the geometry before touching the ring.
        let cap = self.ring.capacity();
        if mv.tx_head - self.tail > cap as i64 {
            return Err(RunnerError::RingOverrun {
                win_idx: self.win_idx,
                tail: self.tail,
                head: mv.tx_head,
                capacity: cap,
            });
        }

        self.add_edges(mv.tx_head);
        self.del_edges(mv.tx_tail)?;

        if self.is_max && mv.open_win {
            self.all_open.store(true, Ordering::Release);
        }

        if !self.all_open.load(Ordering::Acquire) {
            return Ok(());
        }

        let snap = WindowSnapshot {
            win_idx: self.win_idx,
            head: self.head,
            tail: self.tail,
            edge_count: self.evidence.len(),
        };
        for st in &mut self.strategies {
            if let Err(e) = st.on_move(&snap, mv, self.sink.as_ref()).await {
                // Transient-downstream: report and keep the window moving;
                // this margin is simply unemitted.
                self.emit_failures += 1;
                log::warn!(
                    "[win {}] emit failed (total {}): {}",
                    self.win_idx,
                    self.emit_failures,
                    e
                );
            }
        }
        Ok(())
    }

    fn add_edges(&mut self, head: i64) {
        if head <= self.head {
            return;
        }
        for i in self.head..head {
            let ev = self.ring.get(i);
            let from = ev.from as u32;
            let to = ev.to as u32;

            self.adj.entry(from).or_default().insert(to);
            self.rev.entry(to).or_default().insert(from);
            self.evidence.entry(edge_key(from, to)).or_default().push(i);
        }
        self.head = head;
    }

    fn del_edges(&mut self, new_tail: i64) -> Result<(), RunnerError> {
        if new_tail <= self.tail {
            return Ok(());
        }
        // tail > head would mean a margin invariant broke upstream.
        let new_tail = new_tail.min(self.head);

        for i in self.tail..new_tail {
            let ev = self.ring.get(i);
            let from = ev.from as u32;
            let to = ev.to as u32;
            let key = edge_key(from, to);

            let Some(q) = self.evidence.get_mut(&key) else {
                return Err(RunnerError::EvidenceDesync {
                    win_idx: self.win_idx,
                    edge: key,
                    want: i,
                });
            };

            if !q.pop_front_if_eq(i) {
                // Evidence must retire in the exact order it was added.
                // One bounded resync attempt, then halt.
                log::error!(
                    "[win {}] evidence desync: edge={:#x} front={:?} want={}",
                    self.win_idx,
                    key,
                    q.front(),
                    i
                );
                while q.front().is_some_and(|front| front < i) {
                    q.pop_front();
                }
                if !q.pop_front_if_eq(i) {
                    return Err(RunnerError::EvidenceDesync {
                        win_idx: self.win_idx,
                        edge: key,
                        want: i,
                    });
                }
            }

            if q.is_empty() {
                self.evidence.remove(&key);
                del_adj_edge(&mut self.adj, from, to);
                del_adj_edge(&mut self.rev, to, from);
            }
        }

        self.tail = new_tail;
        Ok(())
    }

    pub fn state(&self) -> WinState {
        if self.all_open.load(Ordering::Acquire) {
            WinState::Active
        } else {
            WinState::Priming
        }
    }

    pub fn win_idx(&self) -> usize {
        self.win_idx
    }

    pub fn head(&self) -> i64 {
        self.head
    }

    pub fn tail(&self) -> i64 {
        self.tail
    }

    pub fn edge_count(&self) -> usize {
        self.evidence.len()
    }

    pub fn contains_edge(&self, from: u32, to: u32) -> bool {
        self.adj.get(&from).is_some_and(|row| row.contains(&to))
    }

    /// Contributing indices for one directed edge, oldest first.
    /// Diagnostics only.
    pub fn evidence_of(&self, from: u32, to: u32) -> Vec<i64> {
        self.evidence
            .get(&edge_key(from, to))
            .map(|q| q.iter().collect())
            .unwrap_or_default()
    }

    /// Reverse adjacency must always be the transpose of the forward one,
    /// and both must carry exactly the edges with live evidence.
    pub fn check_graph_invariants(&self) -> bool {
        for (&from, row) in &self.adj {
            for &to in row {
                if !self.rev.get(&to).is_some_and(|r| r.contains(&from)) {
                    return false;
                }
                if !self.evidence.contains_key(&edge_key(from, to)) {
                    return false;
                }
            }
        }
        for (&to, row) in &self.rev {
            for &from in row {
                if !self.adj.get(&from).is_some_and(|r| r.contains(&to)) {
                    return false;
                }
            }
        }
        let adj_edges: usize = self.adj.values().map(|r| r.len()).sum();
        adj_edges == self.evidence.len()
    }
}

fn del_adj_edge(m: &mut HashMap<u32, HashSet<u32>>, a: u32, b: u32) {
    if let Some(row) = m.get_mut(&a) {
        row.remove(&b);
        if row.is_empty() {
            m.remove(&a);
        }
    }
}
