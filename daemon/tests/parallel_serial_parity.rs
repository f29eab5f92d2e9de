//! Parallel vs sequential execution parity.
//!
//! The determinism contract: receipts, logs, gas accounting and the final
//! state root are identical whatever the worker-pool size, and identical
//! to the plain sequential path.

mod common;

use std::collections::HashMap;

use rand::{rngs::StdRng, Rng, SeedableRng};
use tachyon_common::transaction::Transaction;
use tachyon_daemon::{core::executor::ProcessOutcome, vm::ScriptBuilder};

use common::*;

const SHARED_SLOT_CONTRACT: u64 = 900;
const SHARED_ACCOUNT_CONTRACT: u64 = 901;
const SHARED_ACCOUNT: u64 = 910;

fn contracts() -> Vec<(u64, Vec<u8>)> {
    vec![
        (
            SHARED_SLOT_CONTRACT,
            ScriptBuilder::new()
                .write_own_slot(&slot(1), &slot(2))
                .touch_account(&addr(SHARED_ACCOUNT))
                .build(),
        ),
        (
            SHARED_ACCOUNT_CONTRACT,
            ScriptBuilder::new()
                .read_account(&addr(SHARED_ACCOUNT))
                .touch_account(&addr(911))
                .build(),
        ),
    ]
}

/// Deterministic pseudo-random block: transfers between a small address
/// pool plus contract calls that collide on a shared account, with
/// per-sender nonce tracking.
fn random_block(seed: u64, tx_count: usize) -> (Vec<(u64, u64)>, Vec<Transaction>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let senders: Vec<u64> = (100..110).collect();
    let balances: Vec<(u64, u64)> = senders.iter().map(|s| (*s, FUNDS)).collect();

    let mut nonces: HashMap<u64, u64> = HashMap::new();
    let mut txs = Vec::with_capacity(tx_count);
    for _ in 0..tx_count {
        let from = senders[rng.gen_range(0..senders.len())];
        let nonce = nonces.entry(from).or_insert(0);
        let tx = match rng.gen_range(0..4u32) {
            0 => call(from, SHARED_SLOT_CONTRACT, 0, *nonce, 40_000),
            1 => call(from, SHARED_ACCOUNT_CONTRACT, 0, *nonce, 40_000),
            _ => {
                let to = 200 + rng.gen_range(0..20u64);
                transfer(from, to, 1 + rng.gen_range(0..50u64), *nonce)
            }
        };
        *nonce += 1;
        txs.push(tx);
    }
    (balances, txs)
}

fn assert_same_outcome(a: &ProcessOutcome, b: &ProcessOutcome) {
    assert_eq!(a.receipts, b.receipts);
    assert_eq!(a.logs, b.logs);
    assert_eq!(a.used_gas, b.used_gas);
    assert_eq!(a.fee_amount, b.fee_amount);
    assert_eq!(a.snapshot.state_root(), b.snapshot.state_root());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_parity_across_cpu_counts_on_random_blocks() {
    init_logs();
    for seed in [7u64, 42, 1337] {
        let (balances, txs) = random_block(seed, 24);

        let serial = serial_processor()
            .process(block(1, txs.clone()), snapshot_with(&balances, &contracts()))
            .await
            .unwrap();

        for cpu_count in [1usize, 2, 4, 8] {
            let outcome = processor(cpu_count)
                .process(block(1, txs.clone()), snapshot_with(&balances, &contracts()))
                .await
                .unwrap();
            assert_same_outcome(&outcome, &serial);
            assert!(outcome.group_count <= (2 * cpu_count).max(1));
        }
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_single_group_block_matches_wide_pool() {
    // A dependency chain predicted into one group: the executor takes the
    // serial fallback even with a wide pool, and the output is identical.
    let txs = vec![
        transfer(100, 101, 100, 0),
        transfer(101, 102, 50, 0),
        transfer(102, 103, 25, 0),
        transfer(100, 104, 10, 1),
    ];
    let balances = [(100, FUNDS), (101, FUNDS), (102, FUNDS)];

    let wide = processor(8)
        .process(block(1, txs.clone()), funded_snapshot(&balances))
        .await
        .unwrap();
    assert_eq!(wide.group_count, 1);
    assert_eq!(wide.regroup_rounds, 0);

    let serial = serial_processor()
        .process(block(1, txs), funded_snapshot(&balances))
        .await
        .unwrap();
    assert_same_outcome(&wide, &serial);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_empty_block_is_a_no_op() {
    let before = funded_snapshot(&[(100, FUNDS)]);
    let root = before.state_root();
    let outcome = processor(4).process(block(1, Vec::new()), before).await.unwrap();
    assert!(outcome.receipts.is_empty());
    assert_eq!(outcome.used_gas, 0);
    assert_eq!(outcome.snapshot.state_root(), root);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_repeated_runs_are_bitwise_stable() {
    // Same block, same pool size, many runs: scheduling noise must never
    // reach the output.
    let (balances, txs) = random_block(99, 16);
    let mut roots = Vec::new();
    let mut receipt_sets = Vec::new();
    for _ in 0..5 {
        let outcome = processor(4)
            .process(block(1, txs.clone()), snapshot_with(&balances, &contracts()))
            .await
            .unwrap();
        roots.push(outcome.snapshot.state_root());
        receipt_sets.push(outcome.receipts);
    }
    assert!(roots.windows(2).all(|w| w[0] == w[1]));
    assert!(receipt_sets.windows(2).all(|w| w[0] == w[1]));
}
