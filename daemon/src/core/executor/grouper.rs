use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use tachyon_common::crypto::Address;

use crate::core::state::TouchedAddressSet;

use super::group::{ExecutionGroup, GroupId, TxInfo};

/// Partitions a block-ordered transaction stream into execution groups
/// based on the touch sets the caller supplies (predicted on the first
/// pass, actual during regroup).
///
/// Only writes register an address with a group; reads are free to be
/// shared. Whenever a transaction touches an address some group has
/// already written, the groups involved are merged. All picks are by
/// smallest group id, which keeps the partition independent of map
/// iteration and scheduling order.
pub struct Grouper {
    groups: BTreeMap<GroupId, ExecutionGroup>,
    group_written: HashMap<GroupId, HashSet<Address>>,
    addr_writer: HashMap<Address, GroupId>,
    next_id: GroupId,
    max_groups: usize,
    avg_per_group: usize,
    under_avg: BTreeSet<GroupId>,
}

impl Grouper {
    pub fn new(total_txs: usize, start_id: GroupId, max_groups: usize) -> Self {
        let max_groups = max_groups.max(1);
        let avg_per_group = total_txs.div_ceil(max_groups);
        Self {
            groups: BTreeMap::new(),
            group_written: HashMap::new(),
            addr_writer: HashMap::new(),
            next_id: start_id,
            max_groups,
            avg_per_group,
            under_avg: BTreeSet::new(),
        }
    }

    pub fn push(&mut self, tx_info: TxInfo, touched: &TouchedAddressSet) {
        let ops = touched.address_ops();
        let writes: Vec<Address> = ops
            .iter()
            .filter(|(_, op)| **op)
            .map(|(addr, _)| *addr)
            .collect();

        let mut candidates: BTreeSet<GroupId> = ops
            .keys()
            .filter_map(|addr| self.addr_writer.get(addr))
            .copied()
            .collect();

        if candidates.is_empty() {
            if self.groups.len() < self.max_groups {
                self.create_group(tx_info, &writes);
                return;
            }
            // Full: fold the tx into the emptiest-known group instead.
            let target = self
                .under_avg
                .first()
                .copied()
                .or_else(|| self.groups.keys().next().copied());
            match target {
                Some(id) => {
                    candidates.insert(id);
                }
                None => {
                    self.create_group(tx_info, &writes);
                    return;
                }
            }
        }

        let mut iter = candidates.iter().copied();
        let target = match iter.next() {
            Some(id) => id,
            None => return,
        };
        let rest: Vec<GroupId> = iter.collect();

        // Fold every other candidate into the lowest-id one.
        for other in rest {
            if let Some(mut merged) = self.groups.remove(&other) {
                if let Some(group) = self.groups.get_mut(&target) {
                    group.add_tx_infos(std::mem::take(&mut merged.tx_infos));
                }
                if let Some(written) = self.group_written.remove(&other) {
                    for addr in written {
                        self.addr_writer.insert(addr, target);
                        self.group_written.entry(target).or_default().insert(addr);
                    }
                }
                self.under_avg.remove(&other);
            }
        }

        let written = self.group_written.entry(target).or_default();
        for addr in &writes {
            written.insert(*addr);
            self.addr_writer.insert(*addr, target);
        }

        if let Some(group) = self.groups.get_mut(&target) {
            group.add_tx_info(tx_info);
            if group.tx_count() >= self.avg_per_group {
                self.under_avg.remove(&target);
            }
        }
    }

    fn create_group(&mut self, tx_info: TxInfo, writes: &[Address]) {
        let id = self.next_id;
        self.next_id += 1;

        let mut group = ExecutionGroup::new(id);
        group.add_tx_info(tx_info);

        let written = self.group_written.entry(id).or_default();
        for addr in writes {
            written.insert(*addr);
            self.addr_writer.insert(*addr, id);
        }
        if self.avg_per_group > 1 {
            self.under_avg.insert(id);
        }
        self.groups.insert(id, group);
    }

    /// Sort each group by original transaction index, rebind every tx to
    /// its final group id, and hand the partition back.
    pub fn finish(mut self) -> (BTreeMap<GroupId, ExecutionGroup>, GroupId) {
        for (id, group) in self.groups.iter_mut() {
            group.sort_tx_infos();
            for info in group.tx_infos.iter_mut() {
                info.group_id = *id;
            }
        }
        (self.groups, self.next_id)
    }
}
