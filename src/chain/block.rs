use serde::{Deserialize, Serialize};

use super::hash32::Hash32;

/// Block header as serialized by the upstream producer.
///
/// `nonce` never crosses the wire (the producer strips it too); everything
/// else must keep these exact field names.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: i64,
    pub parent_hash: Hash32,
    pub timestamp: i64,
    pub tx_root: Hash32,
    #[serde(skip)]
    pub nonce: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub hash: Hash32,
    pub txs: Vec<Tx>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tx {
    pub hash: Hash32,
    pub tx_body: TxBody,
    pub block_num: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TxBody {
    pub from: String,
    pub to: String,
    pub token: String,
    pub amount: i64,
    pub timestamp: i64,
    #[serde(skip)]
    pub nonce: u64,
}
