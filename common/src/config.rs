use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::crypto::Address;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ===== GAS SCHEDULE =====

// Base cost charged for every transaction
pub const TX_GAS: u64 = 21_000;
// Base cost for a contract-creating transaction
pub const TX_GAS_CONTRACT_CREATION: u64 = 53_000;
// Per-byte calldata cost
pub const TX_DATA_NON_ZERO_GAS: u64 = 68;
pub const TX_DATA_ZERO_GAS: u64 = 4;

// ===== PARALLEL EXECUTION =====

// Capacity of the contract -> associated-addresses LRU cache
pub const ASSOCIATED_ADDRESS_CACHE_SIZE: usize = 10_240;
// Upper bound on execution groups is this multiple of the CPU count
pub const MAX_GROUP_MULTIPLIER: usize = 2;

// ===== SYSTEM ADDRESSES =====

// Number of reserved system/precompile addresses, occupying 0x01..=N.
// These are touched by nearly every contract call and are stripped from
// associated-address sets to avoid false conflicts.
pub const SYSTEM_ADDRESS_COUNT: u64 = 9;

pub fn is_system_address(addr: &Address) -> bool {
    (1..=SYSTEM_ADDRESS_COUNT).any(|i| *addr == Address::from_low_u64(i))
}

pub fn system_addresses() -> impl Iterator<Item = Address> {
    (1..=SYSTEM_ADDRESS_COUNT).map(Address::from_low_u64)
}

/// Chain-level policy shared by every component of the node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain_id: u64,
    /// Senders rejected at decode time (policy ban list).
    pub forbidden_senders: HashSet<Address>,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            chain_id: 1,
            forbidden_senders: HashSet::new(),
        }
    }
}
