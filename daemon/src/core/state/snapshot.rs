use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use log::trace;
use tachyon_common::{
    account::Account,
    crypto::{canonical_hash, Address, Hash},
};

use crate::core::error::VmError;

use super::touched::TouchedAddressSet;

/// Committed world-state shared (immutably) between snapshot copies.
#[derive(Debug, Clone, Default)]
pub struct StateImage {
    pub accounts: BTreeMap<Address, Account>,
    pub storage: BTreeMap<Address, BTreeMap<Hash, Hash>>,
}

impl StateImage {
    pub fn with_accounts<I>(accounts: I) -> Self
    where
        I: IntoIterator<Item = (Address, Account)>,
    {
        Self {
            accounts: accounts.into_iter().collect(),
            storage: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
struct TxContext {
    hash: Hash,
    block_hash: Hash,
    index: usize,
}

/// Absolute previous values recorded on first write within a transaction.
#[derive(Debug, Clone)]
enum UndoEntry {
    Account {
        address: Address,
        prev: Option<Account>,
    },
    Storage {
        address: Address,
        key: Hash,
        prev: Option<Hash>,
    },
}

/// One account's materialized state, shipped from a group snapshot to the
/// snapshot merger.
#[derive(Debug, Clone)]
pub struct StateObjectUpdate {
    pub address: Address,
    pub account: Option<Account>,
    pub storage: Vec<(Hash, Option<Hash>)>,
}

/// Which parts of an account a new group imports from another group's
/// snapshot when a transaction result is reused.
#[derive(Debug, Clone, Default)]
pub struct ReuseEntry {
    pub address: Address,
    /// Import the account record itself (balance, nonce, code).
    pub reuse_data: bool,
    /// Storage slots to import.
    pub keys: Vec<Hash>,
}

impl ReuseEntry {
    pub fn new(address: Address) -> Self {
        Self {
            address,
            ..Default::default()
        }
    }
}

/// A logically independent, journaled view of world-state.
///
/// Copies share the immutable base image behind an `Arc`; every write goes
/// to a per-snapshot dirty overlay (`None` marks a deleted entry), so
/// copies diverge without leaking into each other.
///
/// Two journals back the per-transaction undo protocol: the transient
/// journal collects undo entries for the transaction currently being
/// executed and is folded into the committed journal at `finalize`; the
/// committed journal keeps per-transaction entries until the snapshot is
/// merged away, which is what makes `revert_tx` and journal transfer
/// between groups possible.
#[derive(Debug, Clone, Default)]
pub struct StateSnapshot {
    base: Arc<StateImage>,
    accounts: HashMap<Address, Option<Account>>,
    storage: HashMap<Address, HashMap<Hash, Option<Hash>>>,

    current_tx: Option<TxContext>,
    transient: Vec<UndoEntry>,
    journaled_accounts: HashSet<Address>,
    journaled_slots: HashSet<(Address, Hash)>,
    committed: HashMap<Hash, Vec<UndoEntry>>,

    touched: TouchedAddressSet,
}

impl StateSnapshot {
    pub fn new(base: Arc<StateImage>) -> Self {
        Self {
            base,
            ..Default::default()
        }
    }

    /// Logical value of an account: overlay first, then the base image.
    pub fn account(&self, address: &Address) -> Option<Account> {
        match self.accounts.get(address) {
            Some(slot) => slot.clone(),
            None => self.base.accounts.get(address).cloned(),
        }
    }

    /// Logical value of a storage slot, `None` when unset.
    pub fn storage_slot(&self, address: &Address, key: &Hash) -> Option<Hash> {
        if let Some(slots) = self.storage.get(address) {
            if let Some(value) = slots.get(key) {
                return *value;
            }
        }
        self.base
            .storage
            .get(address)
            .and_then(|slots| slots.get(key).copied())
    }

    /// This snapshot's dirty slots for one account, key-ordered.
    pub fn dirty_slots(&self, address: &Address) -> Vec<(Hash, Option<Hash>)> {
        let mut slots: Vec<(Hash, Option<Hash>)> = self
            .storage
            .get(address)
            .map(|m| m.iter().map(|(k, v)| (*k, *v)).collect())
            .unwrap_or_default();
        slots.sort_by_key(|(key, _)| *key);
        slots
    }

    // ----- per-transaction journal protocol -----

    /// Begin journaling the given transaction's writes.
    pub fn prepare(&mut self, tx_hash: Hash, block_hash: Hash, tx_index: usize) {
        self.current_tx = Some(TxContext {
            hash: tx_hash,
            block_hash,
            index: tx_index,
        });
        self.transient.clear();
        self.journaled_accounts.clear();
        self.journaled_slots.clear();
        self.touched = TouchedAddressSet::new();
    }

    /// Close the current transaction's journal entry and clear empty-object
    /// dust. Without an open transaction this only sweeps dust, so it is
    /// safe to call again after a revert or a reuse import.
    pub fn finalize(&mut self) {
        self.clear_dust();
        if let Some(ctx) = self.current_tx.take() {
            trace!(
                "finalize tx {} (index {}) in block {}",
                ctx.hash,
                ctx.index,
                ctx.block_hash
            );
            let entries = std::mem::take(&mut self.transient);
            self.committed.insert(ctx.hash, entries);
        }
        self.journaled_accounts.clear();
        self.journaled_slots.clear();
    }

    /// Drop the current transaction without committing: undo its transient
    /// journal so the snapshot is back to its pre-`prepare` state.
    pub fn discard_tx(&mut self) {
        let entries = std::mem::take(&mut self.transient);
        for entry in entries.into_iter().rev() {
            self.apply_undo(entry);
        }
        self.current_tx = None;
        self.journaled_accounts.clear();
        self.journaled_slots.clear();
    }

    /// Undo exactly the effects committed under `tx_hash`.
    pub fn revert_tx(&mut self, tx_hash: &Hash) {
        if let Some(entries) = self.committed.remove(tx_hash) {
            for entry in entries.into_iter().rev() {
                self.apply_undo(entry);
            }
        }
    }

    /// The actual touch set recorded since `prepare`; resets the journal.
    pub fn finalize_touched_addresses(&mut self) -> TouchedAddressSet {
        std::mem::take(&mut self.touched)
    }

    /// A snapshot that can mutate independently of `self`. The base image
    /// is shared; overlays and journals are deep-copied.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Import account data and/or storage slots from another snapshot,
    /// taking `other`'s current values. Unknown addresses are no-ops.
    pub fn copy_state_objects_from<'a, I>(&mut self, other: &StateSnapshot, plan: I)
    where
        I: IntoIterator<Item = &'a ReuseEntry>,
    {
        for entry in plan {
            if entry.reuse_data {
                self.accounts
                    .insert(entry.address, other.account(&entry.address));
            }
            if !entry.keys.is_empty() {
                let slots = self.storage.entry(entry.address).or_default();
                for key in &entry.keys {
                    slots.insert(*key, other.storage_slot(&entry.address, key));
                }
            }
        }
    }

    /// Adopt `other`'s committed journal entry for `tx_hash` so a later
    /// `revert_tx(tx_hash)` works against this snapshot.
    pub fn copy_tx_journal_from(&mut self, other: &StateSnapshot, tx_hash: &Hash) {
        if let Some(entries) = other.committed.get(tx_hash) {
            self.committed.insert(*tx_hash, entries.clone());
        }
    }

    /// Commit one account's merged state; used while folding group
    /// snapshots back into the authoritative snapshot.
    pub fn update_trie(&mut self, update: StateObjectUpdate) {
        self.accounts.insert(update.address, update.account);
        if !update.storage.is_empty() {
            let slots = self.storage.entry(update.address).or_default();
            for (key, value) in update.storage {
                slots.insert(key, value);
            }
        }
    }

    /// This snapshot's view of `address` if it differs from
    /// `authoritative`'s; what the worker streams to the snapshot merger.
    pub fn diff_state_object(
        &self,
        authoritative: &StateSnapshot,
        address: &Address,
    ) -> Option<StateObjectUpdate> {
        let account = self.account(address);
        let storage = self.dirty_slots(address);
        let account_changed = account != authoritative.account(address);
        let storage_changed = storage
            .iter()
            .any(|(key, value)| *value != authoritative.storage_slot(address, key));
        if !account_changed && !storage_changed {
            return None;
        }
        Some(StateObjectUpdate {
            address: *address,
            account,
            storage,
        })
    }

    /// Deterministic root over the folded base + overlay state.
    pub fn state_root(&self) -> Hash {
        let mut accounts: BTreeMap<Address, Account> = self.base.accounts.clone();
        for (addr, slot) in &self.accounts {
            match slot {
                Some(account) => {
                    accounts.insert(*addr, account.clone());
                }
                None => {
                    accounts.remove(addr);
                }
            }
        }

        let mut storage: BTreeMap<Address, BTreeMap<Hash, Hash>> = self.base.storage.clone();
        for (addr, slots) in &self.storage {
            let entry = storage.entry(*addr).or_default();
            for (key, value) in slots {
                match value {
                    Some(v) => {
                        entry.insert(*key, *v);
                    }
                    None => {
                        entry.remove(key);
                    }
                }
            }
        }
        storage.retain(|addr, slots| !slots.is_empty() && accounts.contains_key(addr));

        let entries: Vec<(Address, u64, u64, Option<Hash>, Vec<(Hash, Hash)>)> = accounts
            .iter()
            .map(|(addr, account)| {
                (
                    *addr,
                    account.nonce,
                    account.balance,
                    account.code_hash(),
                    storage
                        .get(addr)
                        .map(|slots| slots.iter().map(|(k, v)| (*k, *v)).collect())
                        .unwrap_or_default(),
                )
            })
            .collect();
        canonical_hash(&entries)
    }

    // ----- accessors used by the VM; every call lands in the touch journal -----

    pub fn get_balance(&mut self, address: &Address) -> u64 {
        self.touched.add_account(*address, false);
        self.account(address).map(|a| a.balance).unwrap_or(0)
    }

    pub fn get_nonce(&mut self, address: &Address) -> u64 {
        self.touched.add_account(*address, false);
        self.account(address).map(|a| a.nonce).unwrap_or(0)
    }

    pub fn get_code(&mut self, address: &Address) -> Option<Arc<Vec<u8>>> {
        self.touched.add_account(*address, false);
        self.account(address).and_then(|a| a.code)
    }

    pub fn add_balance(&mut self, address: &Address, amount: u64) {
        self.touched.add_account(*address, true);
        self.journal_account(*address);
        let account = self.ensure_account(*address);
        account.balance = account.balance.saturating_add(amount);
    }

    pub fn sub_balance(&mut self, address: &Address, amount: u64) -> Result<(), VmError> {
        let have = self.account(address).map(|a| a.balance).unwrap_or(0);
        if have < amount {
            self.touched.add_account(*address, false);
            return Err(VmError::InsufficientBalance {
                need: amount,
                have,
            });
        }
        self.touched.add_account(*address, true);
        self.journal_account(*address);
        let account = self.ensure_account(*address);
        account.balance -= amount;
        Ok(())
    }

    pub fn set_nonce(&mut self, address: &Address, nonce: u64) {
        self.touched.add_account(*address, true);
        self.journal_account(*address);
        self.ensure_account(*address).nonce = nonce;
    }

    pub fn set_code(&mut self, address: &Address, code: Vec<u8>) {
        self.touched.add_account(*address, true);
        self.journal_account(*address);
        self.ensure_account(*address).code = Some(Arc::new(code));
    }

    pub fn get_state(&mut self, address: &Address, key: &Hash) -> Hash {
        self.touched.add_storage(*address, *key, false);
        self.storage_slot(address, key).unwrap_or_else(Hash::zero)
    }

    pub fn set_state(&mut self, address: &Address, key: &Hash, value: Hash) {
        self.touched.add_storage(*address, *key, true);
        self.journal_slot(*address, *key);
        self.storage
            .entry(*address)
            .or_default()
            .insert(*key, Some(value));
    }

    // ----- internals -----

    fn ensure_account(&mut self, address: Address) -> &mut Account {
        let base = &self.base;
        let slot = self
            .accounts
            .entry(address)
            .or_insert_with(|| base.accounts.get(&address).cloned());
        slot.get_or_insert_with(Account::default)
    }

    fn journal_account(&mut self, address: Address) {
        if self.current_tx.is_none() {
            return;
        }
        if self.journaled_accounts.insert(address) {
            let prev = self.account(&address);
            self.transient.push(UndoEntry::Account { address, prev });
        }
    }

    fn journal_slot(&mut self, address: Address, key: Hash) {
        if self.current_tx.is_none() {
            return;
        }
        if self.journaled_slots.insert((address, key)) {
            let prev = self.storage_slot(&address, &key);
            self.transient.push(UndoEntry::Storage { address, key, prev });
        }
    }

    fn apply_undo(&mut self, entry: UndoEntry) {
        match entry {
            UndoEntry::Account { address, prev } => {
                self.accounts.insert(address, prev);
            }
            UndoEntry::Storage { address, key, prev } => {
                self.storage.entry(address).or_default().insert(key, prev);
            }
        }
    }

    fn clear_dust(&mut self) {
        for slot in self.accounts.values_mut() {
            if slot.as_ref().is_some_and(Account::is_empty) {
                *slot = None;
            }
        }
    }
}
