use std::collections::BTreeMap;

use tachyon_common::{
    crypto::{Address, Hash},
    receipt::Receipt,
    transaction::Message,
};

use crate::core::{
    error::BlockchainError,
    state::{ReuseEntry, StateSnapshot, TouchedAddressSet},
};

pub type GroupId = usize;

/// Execution outcome attached to a TxInfo. `receipt` is absent when the
/// VM errored; the touch set is recorded either way.
#[derive(Debug, Clone)]
pub struct TrxResult {
    pub receipt: Option<Receipt>,
    pub touched: TouchedAddressSet,
    pub used_gas: u64,
    pub fee_amount: u64,
}

/// One transaction's journey through the engine: created at prepare,
/// carried by its group until block commit. The owning group is referenced
/// by id, never by pointer.
#[derive(Debug, Clone)]
pub struct TxInfo {
    pub index: usize,
    pub hash: Hash,
    pub message: Message,
    pub group_id: GroupId,
    pub result: Option<TrxResult>,
}

impl TxInfo {
    pub fn new(index: usize, hash: Hash, message: Message) -> Self {
        Self {
            index,
            hash,
            message,
            group_id: 0,
            result: None,
        }
    }
}

/// First VM error hit by a group, by original transaction index.
#[derive(Debug, Clone)]
pub struct GroupError {
    pub tx_index: usize,
    pub error: BlockchainError,
}

/// An ordered subset of the block's transactions, executed sequentially by
/// one worker against its own snapshot.
#[derive(Debug, Default)]
pub struct ExecutionGroup {
    pub id: GroupId,
    pub tx_infos: Vec<TxInfo>,
    pub snapshot: StateSnapshot,
    pub used_gas: u64,
    pub fee_amount: u64,
    pub err: Option<GroupError>,
    /// `Some(i)`: (re-)execute from position `i`; `None`: nothing left to
    /// execute, every result is already attached.
    pub start_index: Option<usize>,
}

impl ExecutionGroup {
    pub fn new(id: GroupId) -> Self {
        Self {
            id,
            start_index: Some(0),
            ..Default::default()
        }
    }

    pub fn add_tx_info(&mut self, tx_info: TxInfo) {
        self.tx_infos.push(tx_info);
    }

    pub fn add_tx_infos(&mut self, tx_infos: Vec<TxInfo>) {
        self.tx_infos.extend(tx_infos);
    }

    pub fn sort_tx_infos(&mut self) {
        self.tx_infos.sort_by_key(|info| info.index);
    }

    pub fn tx_count(&self) -> usize {
        self.tx_infos.len()
    }

    /// Record a VM error; the group stops executing at this transaction.
    pub fn record_error(&mut self, tx_index: usize, error: BlockchainError) {
        self.err = Some(GroupError { tx_index, error });
    }

    /// Reuse plan over every result this group holds: each written account
    /// and each written storage slot, keyed by address.
    pub fn reuse_plan(&self) -> BTreeMap<Address, ReuseEntry> {
        let mut plan: BTreeMap<Address, ReuseEntry> = BTreeMap::new();
        for info in &self.tx_infos {
            if let Some(result) = &info.result {
                append_reuse_entries(&mut plan, &result.touched);
            }
        }
        plan
    }
}

/// Fold one touch set's writes into a reuse plan: account writes import
/// the account record, storage writes import the individual slots.
pub fn append_reuse_entries(
    plan: &mut BTreeMap<Address, ReuseEntry>,
    touched: &TouchedAddressSet,
) {
    for (addr, op) in touched.account_ops() {
        if op {
            plan.entry(*addr)
                .or_insert_with(|| ReuseEntry::new(*addr))
                .reuse_data = true;
        }
    }
    for (addr, key, op) in touched.storage_ops() {
        if op {
            let entry = plan.entry(*addr).or_insert_with(|| ReuseEntry::new(*addr));
            if !entry.keys.contains(key) {
                entry.keys.push(*key);
            }
        }
    }
}
