//! Transaction outpoint type.

use walletd_consensus::{Hash256, ZERO_HASH};

use crate::encoding::{Decodable, DecodeError, Decoder, Encodable, Encoder};

/// Transaction tree holding regular transactions.
pub const TREE_REGULAR: i8 = 0;
/// Transaction tree holding stake transactions.
pub const TREE_STAKE: i8 = 1;

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct OutPoint {
    pub hash: Hash256,
    pub index: u32,
    pub tree: i8,
}

impl OutPoint {
    pub fn new(hash: Hash256, index: u32, tree: i8) -> Self {
        Self { hash, index, tree }
    }

    pub fn null() -> Self {
        Self {
            hash: ZERO_HASH,
            index: u32::MAX,
            tree: TREE_REGULAR,
        }
    }

    pub fn is_null(&self) -> bool {
        self.hash == ZERO_HASH && self.index == u32::MAX
    }
}

impl Encodable for OutPoint {
    fn consensus_encode(&self, encoder: &mut Encoder) {
        encoder.write_hash(&self.hash);
        encoder.write_u32_le(self.index);
        encoder.write_i8(self.tree);
    }
}

impl Decodable for OutPoint {
    fn consensus_decode(decoder: &mut Decoder) -> Result<Self, DecodeError> {
        let hash = decoder.read_hash()?;
        let index = decoder.read_u32_le()?;
        let tree = decoder.read_i8()?;
        Ok(Self { hash, index, tree })
    }
}
