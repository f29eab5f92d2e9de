use std::sync::Arc;

use log::info;
use tachyon_common::{
    block::Block,
    config::{ChainConfig, ASSOCIATED_ADDRESS_CACHE_SIZE, MAX_GROUP_MULTIPLIER},
    crypto::Hashable,
    receipt::{Log, Receipt},
    transaction::ChainSigner,
};

use crate::{
    core::{
        engine::{ChainReward, Engine},
        error::BlockchainError,
        gas_pool::GasPool,
        state::StateSnapshot,
    },
    vm::{Vm, VmConfig},
};

use super::{
    apply::apply_transaction_message,
    associated::AssociatedAddressCache,
    parallel_block::{ExecutedBlock, ParallelBlock},
};

/// Knobs for the block processor. `cpu_count` defaults to the hardware
/// parallelism; `parallel = false` forces the plain sequential path.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    pub chain: ChainConfig,
    pub vm: VmConfig,
    pub cpu_count: usize,
    pub aac_capacity: usize,
    pub max_group_multiplier: usize,
    pub parallel: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            chain: ChainConfig::default(),
            vm: VmConfig::default(),
            cpu_count: num_cpus::get(),
            aac_capacity: ASSOCIATED_ADDRESS_CACHE_SIZE,
            max_group_multiplier: MAX_GROUP_MULTIPLIER,
            parallel: true,
        }
    }
}

impl ProcessorConfig {
    pub fn max_groups(&self) -> usize {
        (self.cpu_count * self.max_group_multiplier).max(1)
    }
}

/// Everything a block execution produces, reward included.
#[derive(Debug)]
pub struct ProcessOutcome {
    pub receipts: Vec<Receipt>,
    pub logs: Vec<Log>,
    pub used_gas: u64,
    pub fee_amount: u64,
    pub reward: ChainReward,
    pub snapshot: StateSnapshot,
    pub regroup_rounds: usize,
    pub group_count: usize,
}

/// Transitions state from one block to the next: the parallel engine by
/// default, the sequential sweep when configured off. Both paths produce
/// identical receipts, gas accounting and state roots.
pub struct StateProcessor<E: Engine> {
    config: Arc<ProcessorConfig>,
    engine: E,
    vm: Arc<dyn Vm>,
    aac: Arc<AssociatedAddressCache>,
}

impl<E: Engine> StateProcessor<E> {
    pub fn new(config: ProcessorConfig, engine: E, vm: Arc<dyn Vm>) -> Self {
        let aac = Arc::new(AssociatedAddressCache::new(config.aac_capacity));
        Self {
            config: Arc::new(config),
            engine,
            vm,
            aac,
        }
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    /// The process-wide contract association cache; shared across blocks.
    pub fn associated_cache(&self) -> &Arc<AssociatedAddressCache> {
        &self.aac
    }

    pub async fn process(
        &self,
        block: Arc<Block>,
        snapshot: StateSnapshot,
    ) -> Result<ProcessOutcome, BlockchainError> {
        if !self.config.parallel {
            return self.process_serial(block, snapshot).await;
        }

        let parallel = ParallelBlock::new(
            block.clone(),
            snapshot,
            self.config.clone(),
            self.vm.clone(),
            self.aac.clone(),
        );
        let ExecutedBlock {
            receipts,
            logs,
            used_gas,
            fee_amount,
            mut snapshot,
            regroup_rounds,
            group_count,
        } = parallel.process().await?;

        let reward = self.engine.finalize(
            &block.header,
            &mut snapshot,
            &block.transactions,
            &receipts,
            fee_amount,
            false,
        )?;

        Ok(ProcessOutcome {
            receipts,
            logs,
            used_gas,
            fee_amount,
            reward,
            snapshot,
            regroup_rounds,
            group_count,
        })
    }

    /// The reference sequential path: one snapshot, block order, finalize
    /// between transactions.
    pub async fn process_serial(
        &self,
        block: Arc<Block>,
        mut snapshot: StateSnapshot,
    ) -> Result<ProcessOutcome, BlockchainError> {
        let block_hash = block.hash();
        let signer = ChainSigner::new(self.config.chain.chain_id);
        let mut pool = GasPool::new(block.gas_limit());

        let mut receipts = Vec::with_capacity(block.tx_count());
        let mut logs: Vec<Log> = Vec::new();
        let mut used_gas: u64 = 0;
        let mut fee_amount: u64 = 0;
        let mut cumulative: u64 = 0;

        if block.tx_count() > 0 {
            info!(
                "processing block {} with {} tx(s) (serial)",
                block.header.number,
                block.tx_count()
            );
        }

        for (index, tx) in block.transactions.iter().enumerate() {
            let hash = tx.hash();
            let message = tx.as_message(&signer)?;
            if self.config.chain.forbidden_senders.contains(&message.from) {
                return Err(BlockchainError::ForbiddenSender(message.from));
            }

            snapshot.prepare(hash, block_hash, index);
            let mut receipt = apply_transaction_message(
                self.vm.as_ref(),
                &mut snapshot,
                &message,
                &block.header,
                &self.config.chain,
                &self.config.vm,
                &mut pool,
                hash,
                index,
            )?;
            snapshot.finalize();
            let _ = snapshot.finalize_touched_addresses();

            used_gas += receipt.gas_used;
            fee_amount += receipt.gas_used.saturating_mul(message.gas_price);
            cumulative += receipt.gas_used;
            receipt.cumulative_gas_used = cumulative;
            logs.extend(receipt.logs.iter().cloned());
            receipts.push(receipt);
        }

        let reward = self.engine.finalize(
            &block.header,
            &mut snapshot,
            &block.transactions,
            &receipts,
            fee_amount,
            false,
        )?;

        Ok(ProcessOutcome {
            receipts,
            logs,
            used_gas,
            fee_amount,
            reward,
            snapshot,
            regroup_rounds: 0,
            group_count: 1,
        })
    }
}
