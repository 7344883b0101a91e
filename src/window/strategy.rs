use async_trait::async_trait;

use crate::dispatch::TxMargin;
use crate::sink::{Sink, SinkError, WinTick};

/// Read-only view of a runner handed to strategies on each margin.
#[derive(Debug, Clone, Copy)]
pub struct WindowSnapshot {
    pub win_idx: usize,
    pub head: i64,
    pub tail: i64,
    pub edge_count: usize,
}

/// A per-window output policy. Strategies only run once the global
/// open-window latch is up; they see every margin from then on.
#[async_trait]
pub trait Strategy: Send {
    async fn on_move(
        &mut self,
        win: &WindowSnapshot,
        mv: &TxMargin,
        sink: &dyn Sink,
    ) -> Result<(), SinkError>;
}

/// Emit a `win_tick` every `every`-th margin.
pub struct EmitTick {
    every: u64,
    n: u64,
}

impl EmitTick {
    pub fn new(every: u64) -> Self {
        EmitTick {
            every: if every == 0 { 200 } else { every },
            n: 0,
        }
    }
}

#[async_trait]
impl Strategy for EmitTick {
    async fn on_move(
        &mut self,
        win: &WindowSnapshot,
        mv: &TxMargin,
        sink: &dyn Sink,
    ) -> Result<(), SinkError> {
        self.n += 1;
        if self.n % self.every != 0 {
            return Ok(());
        }
        let tick = WinTick {
            win_idx: win.win_idx,
            head: mv.tx_head,
            tail: mv.tx_tail,
            open_win: mv.open_win,
        };
        sink.emit("win_tick", serde_json::to_value(tick)?).await
    }
}

#[cfg(test)]
mod tests {
    use crate::sink::MemSink;

    use super::*;

    #[tokio::test]
    async fn test_emit_tick_cadence() {
        let sink = MemSink::new();
        let mut st = EmitTick::new(3);
        let win = WindowSnapshot {
            win_idx: 1,
            head: 0,
            tail: 0,
            edge_count: 0,
        };

        for head in 1..=7i64 {
            let mv = TxMargin {
                tx_head: head,
                tx_tail: 0,
                open_win: true,
            };
            st.on_move(&win, &mv, &sink).await.unwrap();
        }

        // Margins 3 and 6 ticked.
        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].data["head"], 3);
        assert_eq!(records[1].data["head"], 6);
        assert_eq!(records[0].data["win_idx"], 1);
    }

    #[test]
    fn test_zero_cadence_falls_back() {
        let st = EmitTick::new(0);
        assert_eq!(st.every, 200);
    }
}
