mod header;

use serde::{Deserialize, Serialize};

pub use header::BlockHeader;

use crate::{
    crypto::{Hash, Hashable},
    transaction::Transaction,
};

/// An ordered, atomic batch of transactions executed against a prior state.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self {
            header,
            transactions,
        }
    }

    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn gas_limit(&self) -> u64 {
        self.header.gas_limit
    }

    pub fn tx_count(&self) -> usize {
        self.transactions.len()
    }
}
