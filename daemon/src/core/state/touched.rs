use std::collections::BTreeMap;

use tachyon_common::{
    config::is_system_address,
    crypto::{Address, Hash},
};

/// The accounts and storage slots one transaction read or wrote.
///
/// The op flag is the read/write polarity: `true` means written. Merging
/// unions the keys and lets write dominate read. Ordered maps keep every
/// consumer (grouping, conflict detection, reuse planning) deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TouchedAddressSet {
    account_ops: BTreeMap<Address, bool>,
    storage_ops: BTreeMap<(Address, Hash), bool>,
}

impl TouchedAddressSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_account(&mut self, address: Address, write: bool) {
        let op = self.account_ops.entry(address).or_insert(false);
        *op |= write;
    }

    pub fn add_storage(&mut self, address: Address, key: Hash, write: bool) {
        let op = self.storage_ops.entry((address, key)).or_insert(false);
        *op |= write;
    }

    pub fn remove_account(&mut self, address: &Address) {
        self.account_ops.remove(address);
    }

    /// Strip the well-known system/precompile addresses. They are touched
    /// by nearly everything and would only produce false conflicts.
    pub fn remove_args_accounts(&mut self) {
        self.account_ops.retain(|addr, _| !is_system_address(addr));
        self.storage_ops
            .retain(|(addr, _), _| !is_system_address(addr));
    }

    /// Union with `other`; write dominates read on shared keys.
    pub fn merge(&mut self, other: &TouchedAddressSet) {
        for (addr, op) in &other.account_ops {
            self.add_account(*addr, *op);
        }
        for ((addr, key), op) in &other.storage_ops {
            self.add_storage(*addr, *key, *op);
        }
    }

    pub fn copy(&self) -> Self {
        self.clone()
    }

    pub fn contains_account(&self, address: &Address) -> bool {
        self.account_ops.contains_key(address)
    }

    pub fn account_ops(&self) -> impl Iterator<Item = (&Address, bool)> {
        self.account_ops.iter().map(|(addr, op)| (addr, *op))
    }

    pub fn storage_ops(&self) -> impl Iterator<Item = (&Address, &Hash, bool)> {
        self.storage_ops
            .iter()
            .map(|((addr, key), op)| (addr, key, *op))
    }

    pub fn account_count(&self) -> usize {
        self.account_ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.account_ops.is_empty() && self.storage_ops.is_empty()
    }

    /// Per-address polarity with storage touches folded into the account
    /// that owns the slot. Grouping and conflict detection work at
    /// address granularity.
    pub fn address_ops(&self) -> BTreeMap<Address, bool> {
        let mut ops = self.account_ops.clone();
        for ((addr, _), op) in &self.storage_ops {
            let entry = ops.entry(*addr).or_insert(false);
            *entry |= *op;
        }
        ops
    }
}
