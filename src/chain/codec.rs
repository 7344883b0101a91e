use super::block::Block;

pub fn encode_block(b: &Block) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(b)
}

pub fn decode_block(raw: &[u8]) -> Result<Block, serde_json::Error> {
    serde_json::from_slice(raw)
}
