use serde::{Deserialize, Serialize};

/// Normalized transfer event, the unit of the dispatcher event log.
///
/// All fields are integers: addresses and tokens arrive as strings on the
/// wire and are interned to dense IDs before an event is built, so the hot
/// path never touches heap strings. `ts` is the containing block's
/// timestamp in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxEvent {
    pub ts: i64,
    pub from: u64,
    pub to: u64,
    pub token: u32,
    pub amount: i64,
}
