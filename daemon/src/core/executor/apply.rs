use tachyon_common::{
    block::BlockHeader,
    config::{ChainConfig, TX_DATA_NON_ZERO_GAS, TX_DATA_ZERO_GAS, TX_GAS, TX_GAS_CONTRACT_CREATION},
    crypto::{Hash, Hashable},
    receipt::{logs_bloom, Receipt, RECEIPT_STATUS_FAILED, RECEIPT_STATUS_SUCCESS},
    transaction::Message,
};

use crate::{
    core::{
        error::{BlockchainError, VmError},
        gas_pool::GasPool,
        state::StateSnapshot,
    },
    vm::{Vm, VmConfig},
};

/// Gas charged before the VM runs: the base transaction cost plus calldata.
pub fn intrinsic_gas(msg: &Message) -> Result<u64, VmError> {
    let mut gas = if msg.to.is_none() {
        TX_GAS_CONTRACT_CREATION
    } else {
        TX_GAS
    };
    for byte in &msg.data {
        let per_byte = if *byte == 0 {
            TX_DATA_ZERO_GAS
        } else {
            TX_DATA_NON_ZERO_GAS
        };
        gas = gas.checked_add(per_byte).ok_or(VmError::GasOverflow)?;
    }
    Ok(gas)
}

/// Apply one decoded message against a prepared snapshot.
///
/// The caller must have called `snapshot.prepare` for this transaction.
/// On error the snapshot still holds the partial transient journal; the
/// caller discards it (`discard_tx`). Gas flow: the whole limit is bought
/// from the payer and the pool up front, the unused remainder refunded
/// after the VM returns.
#[allow(clippy::too_many_arguments)]
pub fn apply_transaction_message(
    vm: &dyn Vm,
    snapshot: &mut StateSnapshot,
    msg: &Message,
    header: &BlockHeader,
    chain: &ChainConfig,
    vm_config: &VmConfig,
    gas_pool: &mut GasPool,
    tx_hash: Hash,
    tx_index: usize,
) -> Result<Receipt, BlockchainError> {
    let state_nonce = snapshot.get_nonce(&msg.from);
    if msg.nonce < state_nonce {
        return Err(VmError::NonceTooLow {
            expected: state_nonce,
            got: msg.nonce,
        }
        .into());
    }
    if msg.nonce > state_nonce {
        return Err(VmError::NonceTooHigh {
            expected: state_nonce,
            got: msg.nonce,
        }
        .into());
    }

    gas_pool.sub_gas(msg.gas)?;

    let payer = msg.payer();
    let gas_cost = msg
        .gas
        .checked_mul(msg.gas_price)
        .ok_or(VmError::GasOverflow)?;
    let have = snapshot.get_balance(&payer);
    if have < gas_cost {
        return Err(VmError::InsufficientBalanceForGas {
            need: gas_cost,
            have,
        }
        .into());
    }
    snapshot.sub_balance(&payer, gas_cost).map_err(BlockchainError::from)?;

    let intrinsic = intrinsic_gas(msg)?;
    if msg.gas < intrinsic {
        return Err(VmError::OutOfGas {
            limit: msg.gas,
            needed: intrinsic,
        }
        .into());
    }

    snapshot.set_nonce(&msg.from, state_nonce + 1);

    let outcome = vm.apply(snapshot, msg, header, chain, vm_config, msg.gas - intrinsic)?;

    let gas_used = intrinsic + outcome.used_gas;
    let refund = msg.gas - gas_used;
    snapshot.add_balance(&payer, refund.saturating_mul(msg.gas_price));
    gas_pool.add_gas(refund);

    let bloom = logs_bloom(&outcome.logs);
    Ok(Receipt {
        status: if outcome.failed {
            RECEIPT_STATUS_FAILED
        } else {
            RECEIPT_STATUS_SUCCESS
        },
        cumulative_gas_used: 0,
        bloom,
        logs: outcome.logs,
        tx_hash,
        contract_address: outcome.contract_address,
        gas_used,
        block_hash: header.hash(),
        block_number: header.number,
        transaction_index: tx_index as u64,
    })
}
