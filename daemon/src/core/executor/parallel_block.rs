use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use log::{debug, info};
use metrics::{counter, histogram};
use tachyon_common::{
    block::{Block, BlockHeader},
    crypto::{Address, Hash, Hashable},
    receipt::{Log, Receipt},
    transaction::ChainSigner,
};
use tokio::{sync::mpsc, task::JoinSet};

use crate::{
    core::{
        error::BlockchainError,
        gas_pool::GasPool,
        state::{ReuseEntry, StateObjectUpdate, StateSnapshot, TouchedAddressSet},
    },
    vm::Vm,
};

use super::{
    apply::apply_transaction_message,
    associated::AssociatedAddressCache,
    conflict::{ConflictDetector, ConflictReport, ExecutedTx},
    group::{append_reuse_entries, ExecutionGroup, GroupError, GroupId, TrxResult, TxInfo},
    grouper::Grouper,
    processor::ProcessorConfig,
};

/// Everything the caller gets back from one block execution.
#[derive(Debug)]
pub struct ExecutedBlock {
    pub receipts: Vec<Receipt>,
    pub logs: Vec<Log>,
    pub used_gas: u64,
    pub fee_amount: u64,
    pub snapshot: StateSnapshot,
    /// Conflict-resolution rounds the block needed (0 = clean run).
    pub regroup_rounds: usize,
    pub group_count: usize,
}

/// Observation pushed to the associated-address updater after the block
/// executed: one contract call and what it actually touched.
struct AssociatedObservation {
    to: Address,
    from: Address,
    payment: Option<Address>,
    touched: TouchedAddressSet,
}

/// Per-worker handle bundle. The detector and merger channels are absent
/// on the serial fallback path.
struct WorkerContext {
    header: BlockHeader,
    block_hash: Hash,
    config: Arc<ProcessorConfig>,
    vm: Arc<dyn Vm>,
    frozen: Option<Arc<StateSnapshot>>,
    executed_tx: Option<mpsc::Sender<ExecutedTx>>,
    merge_tx: Option<mpsc::Sender<StateObjectUpdate>>,
    exit: Arc<AtomicBool>,
}

/// One block's parallel execution: prepare, group, run workers against
/// per-group snapshots, detect conflicts, regroup-and-revert until clean,
/// then converge the snapshots and rebuild block-ordered receipts.
pub struct ParallelBlock {
    block: Arc<Block>,
    block_hash: Hash,
    groups: BTreeMap<GroupId, ExecutionGroup>,
    associated: HashMap<Address, TouchedAddressSet>,
    next_group_id: GroupId,
    snapshot: StateSnapshot,
    config: Arc<ProcessorConfig>,
    vm: Arc<dyn Vm>,
    aac: Arc<AssociatedAddressCache>,
    regroup_rounds: usize,
}

impl ParallelBlock {
    pub fn new(
        block: Arc<Block>,
        snapshot: StateSnapshot,
        config: Arc<ProcessorConfig>,
        vm: Arc<dyn Vm>,
        aac: Arc<AssociatedAddressCache>,
    ) -> Self {
        let block_hash = block.hash();
        Self {
            block,
            block_hash,
            groups: BTreeMap::new(),
            associated: HashMap::new(),
            next_group_id: 0,
            snapshot,
            config,
            vm,
            aac,
            regroup_rounds: 0,
        }
    }

    pub async fn process(mut self) -> Result<ExecutedBlock, BlockchainError> {
        let started = Instant::now();
        let tx_count = self.block.tx_count();
        if tx_count == 0 {
            return Ok(ExecutedBlock {
                receipts: Vec::new(),
                logs: Vec::new(),
                used_gas: 0,
                fee_amount: 0,
                snapshot: self.snapshot,
                regroup_rounds: 0,
                group_count: 0,
            });
        }

        let number = self.block.header.number;
        info!("processing block {} with {} tx(s)", number, tx_count);

        self.prepare_and_group().await?;
        self.execute_rounds().await;
        let outcome = self.collect().await?;

        counter!("tachyon_blocks_executed_total").increment(1);
        histogram!("tachyon_block_execute_seconds").record(started.elapsed().as_secs_f64());
        info!(
            "processed block {}: {} tx(s), {} group(s), {} regroup round(s) in {:?}",
            number,
            tx_count,
            outcome.group_count,
            outcome.regroup_rounds,
            started.elapsed()
        );
        Ok(outcome)
    }

    fn max_groups(&self) -> usize {
        self.config.max_groups()
    }

    /// Decode and hash every transaction in parallel, fetch the
    /// associated-address cache for every callee, then stream the TxInfos
    /// into the grouper over a bounded channel and hand each group its own
    /// snapshot copy.
    async fn prepare_and_group(&mut self) -> Result<(), BlockchainError> {
        let tx_count = self.block.tx_count();
        let signer = Arc::new(ChainSigner::new(self.config.chain.chain_id));

        let mut decode_set: JoinSet<(usize, Result<TxInfo, BlockchainError>)> = JoinSet::new();
        let mut contract_addrs = Vec::with_capacity(tx_count);
        for (index, tx) in self.block.transactions.iter().enumerate() {
            if let Some(to) = tx.to {
                contract_addrs.push(to);
            }
            let tx = tx.clone();
            let signer = signer.clone();
            let config = self.config.clone();
            decode_set.spawn(async move {
                let hash = tx.hash();
                let decoded = tx
                    .as_message(signer.as_ref())
                    .map_err(BlockchainError::from)
                    .and_then(|message| {
                        if config.chain.forbidden_senders.contains(&message.from) {
                            return Err(BlockchainError::ForbiddenSender(message.from));
                        }
                        Ok(TxInfo::new(index, hash, message))
                    });
                (index, decoded)
            });
        }

        let mut infos: Vec<Option<TxInfo>> = (0..tx_count).map(|_| None).collect();
        let mut first_err: Option<(usize, BlockchainError)> = None;
        while let Some(joined) = decode_set.join_next().await {
            let (index, decoded) = joined.expect("transaction decode task panicked");
            match decoded {
                Ok(info) => infos[index] = Some(info),
                Err(err) => {
                    if first_err.as_ref().map_or(true, |(i, _)| index < *i) {
                        first_err = Some((index, err));
                    }
                }
            }
        }
        if let Some((_, err)) = first_err {
            return Err(err);
        }

        self.associated = self.aac.load(&contract_addrs);

        let (info_tx, mut info_rx) = mpsc::channel(tx_count);
        tokio::spawn(async move {
            for info in infos.into_iter().flatten() {
                if info_tx.send(info).await.is_err() {
                    break;
                }
            }
        });

        let mut grouper = Grouper::new(tx_count, self.next_group_id, self.max_groups());
        while let Some(info) = info_rx.recv().await {
            let touched = self.touched_for(&info, false);
            grouper.push(info, &touched);
        }
        let (mut groups, next_id) = grouper.finish();
        self.next_group_id = next_id;

        for group in groups.values_mut() {
            group.snapshot = self.snapshot.copy();
        }
        debug!(
            "block {}: {} tx(s) grouped into {} group(s)",
            self.block.header.number,
            tx_count,
            groups.len()
        );
        self.groups = groups;
        Ok(())
    }

    /// Touch set for grouping: the recorded actual set during regroup,
    /// otherwise the prediction `{payment, from, to} ∪ AAC[to]`.
    fn touched_for(&self, info: &TxInfo, actual: bool) -> TouchedAddressSet {
        if actual {
            if let Some(result) = &info.result {
                return result.touched.clone();
            }
        }

        let mut touched = TouchedAddressSet::new();
        if let Some(payment) = info.message.payment {
            touched.add_account(payment, true);
        }
        touched.add_account(info.message.from, true);
        if let Some(to) = info.message.to {
            match self.associated.get(&to) {
                Some(associated) => touched.merge(associated),
                None => touched.add_account(to, true),
            }
        }
        touched
    }

    /// Run execution rounds until a round completes without conflicts.
    ///
    /// A single group skips the detector and the merger entirely and runs
    /// straight on (a copy of) the authoritative snapshot. With more than
    /// one group, each round spawns one worker per group plus the conflict
    /// detector and the snapshot merger; a non-empty conflict report
    /// cancels the merger, merges the colliding groups, reverts the dirty
    /// suffixes and goes again.
    async fn execute_rounds(&mut self) {
        let tx_count = self.block.tx_count();
        loop {
            if self.groups.len() <= 1 {
                let Some((_, group)) = self.groups.pop_first() else {
                    return;
                };
                let ctx = WorkerContext {
                    header: self.block.header.clone(),
                    block_hash: self.block_hash,
                    config: self.config.clone(),
                    vm: self.vm.clone(),
                    frozen: None,
                    executed_tx: None,
                    merge_tx: None,
                    exit: Arc::new(AtomicBool::new(false)),
                };
                let mut group = execute_group(group, ctx).await;
                group.snapshot.finalize();
                self.snapshot = std::mem::take(&mut group.snapshot);
                self.groups.insert(group.id, group);
                return;
            }

            let (exec_tx, exec_rx) = mpsc::channel(tx_count);
            let (merge_tx, merge_rx) = mpsc::channel(tx_count * 2);
            let exit = Arc::new(AtomicBool::new(false));

            let detector = tokio::spawn(ConflictDetector::new(tx_count).run(exec_rx));
            let merger = spawn_snapshot_merger(self.snapshot.copy(), merge_rx);
            let frozen = Arc::new(self.snapshot.copy());

            let mut workers = JoinSet::new();
            for (_, group) in std::mem::take(&mut self.groups) {
                let ctx = WorkerContext {
                    header: self.block.header.clone(),
                    block_hash: self.block_hash,
                    config: self.config.clone(),
                    vm: self.vm.clone(),
                    frozen: Some(frozen.clone()),
                    executed_tx: Some(exec_tx.clone()),
                    merge_tx: Some(merge_tx.clone()),
                    exit: exit.clone(),
                };
                workers.spawn(execute_group(group, ctx));
            }
            drop(exec_tx);
            drop(merge_tx);

            let report = detector.await.expect("conflict detector task panicked");
            if !report.is_empty() {
                // Workers check this flag between merge emissions.
                exit.store(true, Ordering::Relaxed);
            }

            while let Some(joined) = workers.join_next().await {
                let group = joined.expect("group worker task panicked");
                self.groups.insert(group.id, group);
            }
            let merged = merger.await.expect("snapshot merger task panicked");

            if report.is_empty() {
                self.snapshot = merged;
                return;
            }
            // Conflicts: the partially merged snapshot is discarded and a
            // fresh merger spawned next round.
            drop(merged);
            self.regroup_rounds += 1;
            counter!("tachyon_regroup_rounds_total").increment(1);
            self.regroup_and_revert(&report);
        }
    }

    /// Merge each conflict cluster into fresh groups built from actual
    /// touch sets, revert every transaction that must re-execute (suffix
    /// of its new group, undone in reverse on the snapshot that originally
    /// ran it), and import the surviving prefix results into the new
    /// groups' snapshots.
    fn regroup_and_revert(&mut self, report: &ConflictReport) {
        for cluster in &report.clusters {
            let mut old_groups: BTreeMap<GroupId, ExecutionGroup> = BTreeMap::new();
            let mut infos: Vec<TxInfo> = Vec::new();
            for group_id in cluster {
                if let Some(mut group) = self.groups.remove(group_id) {
                    infos.append(&mut group.tx_infos);
                    old_groups.insert(*group_id, group);
                }
            }
            infos.sort_by_key(|info| info.index);
            let old_group_of: HashMap<Hash, GroupId> =
                infos.iter().map(|info| (info.hash, info.group_id)).collect();

            let mut grouper = Grouper::new(infos.len(), self.next_group_id, self.max_groups());
            for info in infos {
                let touched = self.touched_for(&info, true);
                grouper.push(info, &touched);
            }
            let (new_groups, next_id) = grouper.finish();
            self.next_group_id = next_id;

            // First pass: find each group's revert boundary and undo the
            // suffixes, before any state is imported anywhere.
            let mut prepared: Vec<ExecutionGroup> = Vec::new();
            for (_, mut group) in new_groups {
                let boundary = group.tx_infos.iter().position(|info| {
                    report.conflict_txs.contains(&info.hash)
                        || info.result.as_ref().map_or(true, |r| r.receipt.is_none())
                });
                group.start_index = boundary;

                if let Some(boundary) = boundary {
                    for pos in (boundary..group.tx_infos.len()).rev() {
                        let info = &mut group.tx_infos[pos];
                        if info.result.is_none() {
                            continue;
                        }
                        if let Some(old_id) = old_group_of.get(&info.hash) {
                            if let Some(old) = old_groups.get_mut(old_id) {
                                debug!(
                                    "regroup: revert tx {} (index {}) from group {}",
                                    info.hash, info.index, old_id
                                );
                                old.snapshot.revert_tx(&info.hash);
                            }
                        }
                        info.result = None;
                    }
                }
                prepared.push(group);
            }

            // Second pass: give each group a fresh snapshot and import the
            // reusable results (state objects, journals, gas totals).
            for mut group in prepared {
                group.snapshot = self.snapshot.copy();
                let reusable = group.start_index.unwrap_or(group.tx_infos.len());
                let mut plans: BTreeMap<GroupId, BTreeMap<Address, ReuseEntry>> = BTreeMap::new();
                for info in group.tx_infos.iter().take(reusable) {
                    let Some(result) = &info.result else { continue };
                    let Some(old_id) = old_group_of.get(&info.hash) else {
                        continue;
                    };
                    let Some(old) = old_groups.get(old_id) else {
                        continue;
                    };
                    append_reuse_entries(plans.entry(*old_id).or_default(), &result.touched);
                    group.snapshot.copy_tx_journal_from(&old.snapshot, &info.hash);
                    group.used_gas += result.used_gas;
                    group.fee_amount += result.fee_amount;
                }
                for (old_id, plan) in &plans {
                    if let Some(old) = old_groups.get(old_id) {
                        group
                            .snapshot
                            .copy_state_objects_from(&old.snapshot, plan.values());
                    }
                }
                group.snapshot.finalize();
                self.groups.insert(group.id, group);
            }
        }
    }

    /// After the last round: surface the earliest group error, rebuild
    /// receipts in block order, run the serial cumulative-gas sweep, and
    /// feed the associated-address updater.
    async fn collect(mut self) -> Result<ExecutedBlock, BlockchainError> {
        let tx_count = self.block.tx_count();
        let group_count = self.groups.len();

        let (assoc_tx, mut assoc_rx) = mpsc::channel::<AssociatedObservation>(tx_count);
        let aac = self.aac.clone();
        let updater = tokio::spawn(async move {
            let mut observed: HashMap<Address, TouchedAddressSet> = HashMap::new();
            while let Some(obs) = assoc_rx.recv().await {
                let mut touched = obs.touched.copy();
                touched.remove_account(&obs.from);
                if let Some(payment) = &obs.payment {
                    touched.remove_account(payment);
                }
                touched.remove_args_accounts();
                // A single remaining entry says nothing beyond the callee
                // itself; only multi-address sets are worth caching.
                if touched.account_count() > 1 {
                    observed.insert(obs.to, touched);
                }
            }
            aac.update(observed);
        });

        let mut first_err: Option<GroupError> = None;
        let mut used_gas: u64 = 0;
        let mut fee_amount: u64 = 0;
        let mut receipts: Vec<Option<Receipt>> = vec![None; tx_count];
        for group in self.groups.values() {
            if let Some(err) = &group.err {
                if first_err
                    .as_ref()
                    .map_or(true, |e| err.tx_index < e.tx_index)
                {
                    first_err = Some(err.clone());
                }
            }
            used_gas += group.used_gas;
            fee_amount += group.fee_amount;

            for info in &group.tx_infos {
                if let Some(result) = &info.result {
                    receipts[info.index] = result.receipt.clone();
                    if let Some(to) = info.message.to {
                        let _ = assoc_tx
                            .send(AssociatedObservation {
                                to,
                                from: info.message.from,
                                payment: info.message.payment,
                                touched: result.touched.clone(),
                            })
                            .await;
                    }
                }
            }
        }
        drop(assoc_tx);
        updater
            .await
            .expect("associated-address updater task panicked");

        // Serial sweep: block-level gas accounting and cumulative totals.
        let mut pool = GasPool::new(self.block.gas_limit());
        let mut cumulative: u64 = 0;
        let mut logs: Vec<Log> = Vec::new();
        for (index, tx) in self.block.transactions.iter().enumerate() {
            pool.sub_gas(tx.gas)?;
            if let Some(err) = &first_err {
                if index >= err.tx_index {
                    return Err(err.error.clone());
                }
            }
            let receipt = receipts[index]
                .as_mut()
                .ok_or(BlockchainError::MissingReceipt(index))?;
            pool.add_gas(tx.gas - receipt.gas_used);
            cumulative += receipt.gas_used;
            receipt.cumulative_gas_used = cumulative;
            logs.extend(receipt.logs.iter().cloned());
        }

        let receipts = receipts
            .into_iter()
            .enumerate()
            .map(|(index, receipt)| receipt.ok_or(BlockchainError::MissingReceipt(index)))
            .collect::<Result<Vec<Receipt>, BlockchainError>>()?;

        Ok(ExecutedBlock {
            receipts,
            logs,
            used_gas,
            fee_amount,
            snapshot: self.snapshot,
            regroup_rounds: self.regroup_rounds,
            group_count,
        })
    }
}

fn spawn_snapshot_merger(
    mut merged: StateSnapshot,
    mut rx: mpsc::Receiver<StateObjectUpdate>,
) -> tokio::task::JoinHandle<StateSnapshot> {
    tokio::spawn(async move {
        while let Some(update) = rx.recv().await {
            merged.update_trie(update);
        }
        merged
    })
}

/// Run one group's pending transactions in order, streaming each result
/// (including reused prefixes) to the conflict detector, then ship the
/// group's written accounts to the snapshot merger.
async fn execute_group(mut group: ExecutionGroup, ctx: WorkerContext) -> ExecutionGroup {
    if let Some(start) = group.start_index {
        let mut gas_pool = GasPool::new(ctx.header.gas_limit);
        'exec: for i in 0..group.tx_infos.len() {
            if i < start {
                emit(&ctx, &group.tx_infos[i]).await;
                continue;
            }

            let hash = group.tx_infos[i].hash;
            let index = group.tx_infos[i].index;
            group.snapshot.prepare(hash, ctx.block_hash, index);
            let applied = apply_transaction_message(
                ctx.vm.as_ref(),
                &mut group.snapshot,
                &group.tx_infos[i].message,
                &ctx.header,
                &ctx.config.chain,
                &ctx.config.vm,
                &mut gas_pool,
                hash,
                index,
            );
            match applied {
                Ok(receipt) => {
                    group.snapshot.finalize();
                    let touched = group.snapshot.finalize_touched_addresses();
                    let gas_used = receipt.gas_used;
                    let fee = gas_used.saturating_mul(group.tx_infos[i].message.gas_price);
                    group.used_gas += gas_used;
                    group.fee_amount += fee;
                    group.tx_infos[i].result = Some(TrxResult {
                        receipt: Some(receipt),
                        touched,
                        used_gas: gas_used,
                        fee_amount: fee,
                    });
                    emit(&ctx, &group.tx_infos[i]).await;
                }
                Err(err) => {
                    let touched = group.snapshot.finalize_touched_addresses();
                    group.snapshot.discard_tx();
                    debug!("group {}: tx {} (index {}) failed: {}", group.id, hash, index, err);
                    group.record_error(index, err);
                    group.tx_infos[i].result = Some(TrxResult {
                        receipt: None,
                        touched,
                        used_gas: 0,
                        fee_amount: 0,
                    });
                    emit(&ctx, &group.tx_infos[i]).await;
                    break 'exec;
                }
            }
        }
        group.start_index = None;
    } else {
        for info in &group.tx_infos {
            emit(&ctx, info).await;
        }
    }

    let (Some(frozen), Some(merge_tx)) = (&ctx.frozen, &ctx.merge_tx) else {
        return group;
    };
    for address in group.reuse_plan().into_keys() {
        if ctx.exit.load(Ordering::Relaxed) {
            return group;
        }
        if let Some(update) = group.snapshot.diff_state_object(frozen, &address) {
            let _ = merge_tx.send(update).await;
        }
    }
    group
}

async fn emit(ctx: &WorkerContext, info: &TxInfo) {
    let Some(sender) = &ctx.executed_tx else { return };
    let Some(result) = &info.result else { return };
    let _ = sender
        .send(ExecutedTx {
            index: info.index,
            hash: info.hash,
            group_id: info.group_id,
            touched: result.touched.clone(),
        })
        .await;
}
