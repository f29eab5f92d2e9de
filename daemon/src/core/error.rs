use thiserror::Error;

use tachyon_common::{crypto::Address, transaction::SignerError};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    #[error("invalid transaction signature")]
    InvalidSignature,

    #[error("sender {0} is forbidden by policy")]
    ForbiddenSender(Address),

    #[error("block gas limit reached: requested {requested}, remaining {remaining}")]
    GasLimitReached { requested: u64, remaining: u64 },

    #[error("internal: missing receipt for transaction {0}")]
    MissingReceipt(usize),

    #[error(transparent)]
    Vm(#[from] VmError),
}

impl From<SignerError> for BlockchainError {
    fn from(_: SignerError) -> Self {
        BlockchainError::InvalidSignature
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum VmError {
    #[error("nonce too low: expected {expected}, got {got}")]
    NonceTooLow { expected: u64, got: u64 },

    #[error("nonce too high: expected {expected}, got {got}")]
    NonceTooHigh { expected: u64, got: u64 },

    #[error("insufficient balance for gas payment: need {need}, have {have}")]
    InsufficientBalanceForGas { need: u64, have: u64 },

    #[error("insufficient balance for transfer: need {need}, have {have}")]
    InsufficientBalance { need: u64, have: u64 },

    #[error("gas cost overflow")]
    GasOverflow,

    #[error("out of gas: limit {limit}, needed {needed}")]
    OutOfGas { limit: u64, needed: u64 },

    #[error("malformed contract script at offset {0}")]
    MalformedScript(usize),
}
