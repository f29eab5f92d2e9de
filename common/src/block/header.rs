use serde::{Deserialize, Serialize};

use crate::crypto::{canonical_hash, Hash, Hashable};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockHeader {
    pub number: u64,
    pub parent_hash: Hash,
    pub gas_limit: u64,
    pub timestamp: u64,
}

impl BlockHeader {
    pub fn new(number: u64, parent_hash: Hash, gas_limit: u64, timestamp: u64) -> Self {
        Self {
            number,
            parent_hash,
            gas_limit,
            timestamp,
        }
    }
}

impl Hashable for BlockHeader {
    fn hash(&self) -> Hash {
        canonical_hash(self)
    }
}
