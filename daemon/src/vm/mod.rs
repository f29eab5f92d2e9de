mod native;

pub use native::{NativeVm, ScriptBuilder};

use tachyon_common::{
    block::BlockHeader, config::ChainConfig, crypto::Address, receipt::Log, transaction::Message,
};

use crate::core::{error::VmError, state::StateSnapshot};

/// Tuning knobs for the built-in VM. Opaque to the execution engine.
#[derive(Debug, Clone)]
pub struct VmConfig {
    /// Gas charged per interpreted script operation.
    pub op_gas: u64,
    /// Gas charged per byte of deployed contract code.
    pub create_byte_gas: u64,
}

impl Default for VmConfig {
    fn default() -> Self {
        Self {
            op_gas: 200,
            create_byte_gas: 200,
        }
    }
}

/// Result of applying one message.
///
/// `failed` marks a valid execution that reverted (status-0 receipt);
/// hard failures that consume no block slot surface as `VmError` instead.
#[derive(Debug, Clone, Default)]
pub struct VmOutcome {
    pub return_data: Vec<u8>,
    pub used_gas: u64,
    pub failed: bool,
    pub logs: Vec<Log>,
    pub contract_address: Option<Address>,
}

/// The virtual machine boundary. While executing, the VM records every
/// account and storage read/write through the snapshot accessors; the
/// engine collects them afterwards via `finalize_touched_addresses`.
pub trait Vm: Send + Sync {
    fn apply(
        &self,
        snapshot: &mut StateSnapshot,
        msg: &Message,
        header: &BlockHeader,
        chain: &ChainConfig,
        config: &VmConfig,
        gas: u64,
    ) -> Result<VmOutcome, VmError>;
}
