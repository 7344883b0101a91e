//! Dense ID interners for addresses and token names.
//!
//! Both interners share the same shape: shard by a stable hash of the key,
//! read-biased lock per shard, one process-wide atomic counter for ID
//! assignment. IDs are dense from 1; 0 is reserved for "absent/invalid".
//! Entries are never removed.

mod address;
mod token;

pub use address::{parse_addr20, Addr20, AddressInterner, BadAddress};
pub use token::TokenInterner;
