use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::chain::Block;
use crate::event::TxEvent;
use crate::ids::{AddressInterner, TokenInterner};

/// Projects decoded blocks into normalized transfer events.
///
/// Addresses and tokens are interned here; the drop policies decide what
/// happens to transactions that fail interning. Filtering happens before
/// index assignment, so the retained events of a block always occupy a
/// dense index range.
pub struct BlockAdapter {
    addrs: Arc<AddressInterner>,
    tokens: Arc<TokenInterner>,

    pub drop_bad_addr: bool,
    pub drop_no_token: bool,

    dropped_bad_addr: AtomicU64,
    dropped_no_token: AtomicU64,
}

impl BlockAdapter {
    pub fn new(addrs: Arc<AddressInterner>, tokens: Arc<TokenInterner>) -> Self {
        BlockAdapter {
            addrs,
            tokens,
            drop_bad_addr: true,
            // An empty token can still map to ID 0 downstream.
            drop_no_token: false,
            dropped_bad_addr: AtomicU64::new(0),
            dropped_no_token: AtomicU64::new(0),
        }
    }

    /// Normalized events for one block, in transaction order, already
    /// filtered by the drop policies. Event `ts` is the block timestamp.
    pub fn project_block(&self, blk: &Block) -> Vec<TxEvent> {
        let block_ts = blk.header.timestamp;
        let mut out = Vec::with_capacity(blk.txs.len());

        for tx in &blk.txs {
            let body = &tx.tx_body;

            let from = match self.addrs.id_of(&body.from) {
                Some(id) => id,
                None => {
                    if self.drop_bad_addr {
                        self.dropped_bad_addr.fetch_add(1, Ordering::Relaxed);
                        log::debug!("[adapter] drop tx: bad from addr={:?}", body.from);
                        continue;
                    }
                    0
                }
            };

            let to = match self.addrs.id_of(&body.to) {
                Some(id) => id,
                None => {
                    if self.drop_bad_addr {
                        self.dropped_bad_addr.fetch_add(1, Ordering::Relaxed);
                        log::debug!("[adapter] drop tx: bad to addr={:?}", body.to);
                        continue;
                    }
                    0
                }
            };

            let token = self.tokens.id_of(&body.token);
            if token == 0 && self.drop_no_token {
                self.dropped_no_token.fetch_add(1, Ordering::Relaxed);
                log::debug!("[adapter] drop tx: empty token");
                continue;
            }

            out.push(TxEvent {
                ts: block_ts,
                from,
                to,
                token,
                amount: body.amount,
            });
        }

        out
    }

    /// Emit `events` at indices `[base, base + events.len())`, split into
    /// `parts` contiguous chunks. `parts <= 1` is the sequential path and
    /// is mandatory when the emit target cannot take concurrent writes at
    /// disjoint indices. Chunks never share an index, so a `Sync` emit is
    /// race-free.
    pub fn emit_chunked<F>(&self, events: &[TxEvent], base: i64, parts: usize, emit: F)
    where
        F: Fn(TxEvent, i64) + Sync,
    {
        let n = events.len();
        if n == 0 {
            return;
        }
        if parts <= 1 || n < parts {
            for (i, ev) in events.iter().enumerate() {
                emit(*ev, base + i as i64);
            }
            return;
        }

        let chunk = n.div_ceil(parts);
        std::thread::scope(|s| {
            for (ci, slice) in events.chunks(chunk).enumerate() {
                let emit = &emit;
                let start = base + (ci * chunk) as i64;
                s.spawn(move || {
                    for (i, ev) in slice.iter().enumerate() {
                        emit(*ev, start + i as i64);
                    }
                });
            }
        });
    }

    /// (bad-address drops, empty-token drops) so far.
    pub fn dropped(&self) -> (u64, u64) {
        (
            self.dropped_bad_addr.load(Ordering::Relaxed),
            self.dropped_no_token.load(Ordering::Relaxed),
        )
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;

    use crate::chain::{Block, BlockHeader, Tx, TxBody};

    use super::*;

    fn adapter() -> BlockAdapter {
        BlockAdapter::new(
            Arc::new(AddressInterner::new(4, 0)),
            Arc::new(TokenInterner::new(4, 0)),
        )
    }

    fn tx(from: &str, to: &str, token: &str, amount: i64) -> Tx {
        Tx {
            tx_body: TxBody {
                from: from.to_string(),
                to: to.to_string(),
                token: token.to_string(),
                amount,
                timestamp: 0,
                nonce: 0,
            },
            ..Default::default()
        }
    }

    fn block(ts: i64, txs: Vec<Tx>) -> Block {
        Block {
            header: BlockHeader {
                number: 1,
                timestamp: ts,
                ..Default::default()
            },
            txs,
            ..Default::default()
        }
    }

    const A: &str = "0xaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "0xbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn test_project_block_interns_and_stamps_ts() {
        let ad = adapter();
        let evs = ad.project_block(&block(500, vec![tx(A, B, "GLD", 7)]));
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].ts, 500);
        assert_eq!(evs[0].from, 1);
        assert_eq!(evs[0].to, 2);
        assert_eq!(evs[0].token, 1);
        assert_eq!(evs[0].amount, 7);
    }

    #[test]
    fn test_drop_bad_addr_policy() {
        let ad = adapter();
        let evs = ad.project_block(&block(0, vec![tx("junk", B, "GLD", 1), tx(A, B, "GLD", 2)]));
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].amount, 2);
        assert_eq!(ad.dropped(), (1, 0));

        let mut keep = adapter();
        keep.drop_bad_addr = false;
        let evs = keep.project_block(&block(0, vec![tx("junk", B, "GLD", 1)]));
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].from, 0); // absent maps to reserved ID 0
    }

    #[test]
    fn test_drop_no_token_policy() {
        let mut ad = adapter();
        ad.drop_no_token = true;
        let evs = ad.project_block(&block(0, vec![tx(A, B, "", 1), tx(A, B, "GLD", 2)]));
        assert_eq!(evs.len(), 1);
        assert_eq!(evs[0].token, 1);
        assert_eq!(ad.dropped(), (0, 1));
    }

    #[test]
    fn test_emit_chunked_covers_disjoint_indices() {
        let ad = adapter();
        let events: Vec<TxEvent> = (0..10)
            .map(|i| TxEvent {
                ts: i,
                from: i as u64,
                to: 0,
                token: 1,
                amount: i,
            })
            .collect();

        for parts in [1usize, 3, 4, 16] {
            let got: Mutex<Vec<(i64, i64)>> = Mutex::new(Vec::new());
            ad.emit_chunked(&events, 100, parts, |ev, idx| {
                got.lock().push((idx, ev.amount));
            });
            let mut got = got.into_inner();
            got.sort_unstable();
            let want: Vec<(i64, i64)> = (0..10).map(|i| (100 + i, i)).collect();
            assert_eq!(got, want, "parts={}", parts);
        }
    }
}
