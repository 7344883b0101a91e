//! Wire model for chain blocks as produced by the upstream generator.
//!
//! Field names and framing must match the producer side exactly; the
//! structs here are the single source of truth for the JSON shape.

mod block;
mod codec;
mod hash32;

pub use block::{Block, BlockHeader, Tx, TxBody};
pub use codec::{decode_block, encode_block};
pub use hash32::{BadHash, Hash32};
