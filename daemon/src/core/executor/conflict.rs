use std::collections::{BTreeMap, BTreeSet, HashSet};

use log::debug;
use tachyon_common::crypto::{Address, Hash};
use tokio::sync::mpsc;

use crate::core::state::TouchedAddressSet;

use super::group::GroupId;

/// Post-execution record streamed from a worker to the detector.
#[derive(Debug, Clone)]
pub struct ExecutedTx {
    pub index: usize,
    pub hash: Hash,
    pub group_id: GroupId,
    pub touched: TouchedAddressSet,
}

/// The groups that must merge and the transactions that must re-execute.
#[derive(Debug, Default)]
pub struct ConflictReport {
    /// Disjoint sets of colliding group ids, ordered by smallest member.
    pub clusters: Vec<BTreeSet<GroupId>>,
    pub conflict_txs: HashSet<Hash>,
}

impl ConflictReport {
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Consumes executed transactions out of arrival order, re-orders them by
/// original index, and registers which groups touched which addresses.
///
/// An address enters the table on its first write; any later touch by a
/// different group is a conflict regardless of polarity (the registered
/// touch was a write). Shared reads never register, so they never
/// conflict.
pub struct ConflictDetector {
    total: usize,
    pending: Vec<Option<ExecutedTx>>,
    next_index: usize,
    addr_groups: BTreeMap<Address, BTreeSet<GroupId>>,
    conflict_txs: HashSet<Hash>,
}

impl ConflictDetector {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            pending: (0..total).map(|_| None).collect(),
            next_index: 0,
            addr_groups: BTreeMap::new(),
            conflict_txs: HashSet::new(),
        }
    }

    /// Drain the stream until every transaction has been seen or every
    /// producer hung up (a group that hit a VM error stops emitting).
    pub async fn run(mut self, mut rx: mpsc::Receiver<ExecutedTx>) -> ConflictReport {
        while let Some(executed) = rx.recv().await {
            let index = executed.index;
            if index < self.total {
                self.pending[index] = Some(executed);
            }
            self.drain();
            if self.next_index == self.total {
                break;
            }
        }
        self.report()
    }

    fn drain(&mut self) {
        while self.next_index < self.total {
            let Some(executed) = self.pending[self.next_index].take() else {
                break;
            };
            self.observe(&executed);
            self.next_index += 1;
        }
    }

    fn observe(&mut self, executed: &ExecutedTx) {
        for (addr, op) in executed.touched.address_ops() {
            match self.addr_groups.get_mut(&addr) {
                Some(groups) => {
                    if groups.insert(executed.group_id) {
                        self.conflict_txs.insert(executed.hash);
                    }
                }
                None if op => {
                    let mut groups = BTreeSet::new();
                    groups.insert(executed.group_id);
                    self.addr_groups.insert(addr, groups);
                }
                None => {}
            }
        }
    }

    /// Fixed-point merge of every multi-group address entry into disjoint
    /// clusters.
    fn report(self) -> ConflictReport {
        let mut clusters: Vec<BTreeSet<GroupId>> = Vec::new();
        for groups in self.addr_groups.into_values() {
            if groups.len() <= 1 {
                continue;
            }
            let mut merged = groups;
            clusters.retain(|cluster| {
                if cluster.is_disjoint(&merged) {
                    true
                } else {
                    merged.extend(cluster.iter().copied());
                    false
                }
            });
            clusters.push(merged);
        }
        clusters.sort_by_key(|cluster| cluster.iter().next().copied());

        if !clusters.is_empty() {
            debug!(
                "conflict check: {} cluster(s), {} conflicting tx(s)",
                clusters.len(),
                self.conflict_txs.len()
            );
        }

        ConflictReport {
            clusters,
            conflict_txs: self.conflict_txs,
        }
    }
}
