use tachyon_common::{block::BlockHeader, receipt::Receipt, transaction::Transaction};

use super::{error::BlockchainError, state::StateSnapshot};

/// Per-block reward distribution summary; the executor forwards it to the
/// caller without inspecting it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainReward {
    pub block_number: u64,
    pub fee_amount: u64,
}

/// Consensus-engine boundary: block finalization (reward distribution,
/// header sealing) happens outside the execution engine.
pub trait Engine: Send + Sync {
    fn finalize(
        &self,
        header: &BlockHeader,
        snapshot: &mut StateSnapshot,
        txs: &[Transaction],
        receipts: &[Receipt],
        fee_amount: u64,
        is_reward: bool,
    ) -> Result<ChainReward, BlockchainError>;
}

/// Engine that distributes nothing; what tests and tools run against.
#[derive(Debug, Default)]
pub struct NoopEngine;

impl Engine for NoopEngine {
    fn finalize(
        &self,
        header: &BlockHeader,
        _snapshot: &mut StateSnapshot,
        _txs: &[Transaction],
        _receipts: &[Receipt],
        fee_amount: u64,
        _is_reward: bool,
    ) -> Result<ChainReward, BlockchainError> {
        Ok(ChainReward {
            block_number: header.number,
            fee_amount,
        })
    }
}
