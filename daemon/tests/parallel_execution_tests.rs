//! End-to-end scenarios for the parallel block executor: disjoint blocks
//! fan out cleanly, hidden conflicts are detected and regrouped, VM errors
//! surface as block errors, and gas accounting stays additive.

mod common;

use tachyon_common::config::TX_GAS;
use tachyon_daemon::{
    core::error::{BlockchainError, VmError},
    vm::ScriptBuilder,
};

use common::*;

#[tokio::test(flavor = "multi_thread")]
async fn test_disjoint_transfers_run_in_parallel_groups() {
    let balances = [(100, FUNDS), (102, FUNDS), (104, FUNDS), (106, FUNDS)];
    let txs = vec![
        transfer(100, 101, 10, 0),
        transfer(102, 103, 10, 0),
        transfer(104, 105, 10, 0),
        transfer(106, 107, 10, 0),
    ];

    let processor = processor(4);
    let outcome = processor
        .process(block(1, txs), funded_snapshot(&balances))
        .await
        .unwrap();

    assert_eq!(outcome.group_count, 4);
    assert_eq!(outcome.regroup_rounds, 0);
    assert_eq!(outcome.receipts.len(), 4);

    let cumulative: Vec<u64> = outcome
        .receipts
        .iter()
        .map(|r| r.cumulative_gas_used)
        .collect();
    assert_eq!(cumulative, vec![TX_GAS, 2 * TX_GAS, 3 * TX_GAS, 4 * TX_GAS]);
    assert_eq!(outcome.used_gas, 4 * TX_GAS);

    let state = &outcome.snapshot;
    for sender in [100, 102, 104, 106] {
        let account = state.account(&addr(sender)).unwrap();
        assert_eq!(account.balance, FUNDS - 10 - TX_GAS);
        assert_eq!(account.nonce, 1);
    }
    for receiver in [101, 103, 105, 107] {
        assert_eq!(state.account(&addr(receiver)).unwrap().balance, 10);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn test_hidden_conflict_is_regrouped_to_serial_equivalence() {
    // The contract's write to 201 is invisible to prediction (cold cache),
    // so the grouper separates the two txs and the detector must catch it.
    let contract = ScriptBuilder::new().touch_account(&addr(201)).build();
    let balances = [(100, FUNDS), (201, FUNDS)];
    let contracts = [(500u64, contract)];
    let txs = vec![call(100, 500, 0, 0, 30_000), transfer(201, 202, 5, 0)];

    let outcome = processor(4)
        .process(block(1, txs.clone()), snapshot_with(&balances, &contracts))
        .await
        .unwrap();
    assert_eq!(outcome.regroup_rounds, 1);

    let serial = serial_processor()
        .process(block(1, txs), snapshot_with(&balances, &contracts))
        .await
        .unwrap();

    assert_eq!(outcome.receipts, serial.receipts);
    assert_eq!(outcome.used_gas, serial.used_gas);
    assert_eq!(outcome.fee_amount, serial.fee_amount);
    assert_eq!(outcome.snapshot.state_root(), serial.snapshot.state_root());

    let state = &outcome.snapshot;
    assert_eq!(state.account(&addr(202)).unwrap().balance, 5);
    assert_eq!(
        state.account(&addr(201)).unwrap().balance,
        FUNDS - 5 - TX_GAS
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn test_vm_error_surfaces_earliest_and_discards_suffix() {
    let hog = ScriptBuilder::new().burn_gas(1_000_000).build();
    let balances = [(100, FUNDS), (102, FUNDS), (104, FUNDS)];
    let contracts = [(501u64, hog)];
    let txs = vec![
        transfer(100, 200, 10, 0),
        call(102, 501, 0, 0, 50_000),
        transfer(104, 204, 10, 0),
    ];

    let err = processor(4)
        .process(block(1, txs.clone()), snapshot_with(&balances, &contracts))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        BlockchainError::Vm(VmError::OutOfGas { .. })
    ));

    let serial_err = serial_processor()
        .process(block(1, txs), snapshot_with(&balances, &contracts))
        .await
        .unwrap_err();
    assert_eq!(err, serial_err);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_gas_is_additive_across_groups_and_receipts() {
    let balances = [(100, FUNDS), (102, FUNDS), (104, FUNDS)];
    let txs = vec![
        transfer(100, 101, 1, 0),
        transfer(102, 103, 2, 0),
        transfer(104, 105, 3, 0),
    ];

    let outcome = processor(2)
        .process(block(1, txs), funded_snapshot(&balances))
        .await
        .unwrap();

    let receipt_sum: u64 = outcome.receipts.iter().map(|r| r.gas_used).sum();
    let last_cumulative = outcome.receipts.last().unwrap().cumulative_gas_used;
    assert_eq!(outcome.used_gas, receipt_sum);
    assert_eq!(outcome.used_gas, last_cumulative);
    assert_eq!(outcome.fee_amount, receipt_sum); // gas price 1 everywhere
    assert_eq!(outcome.reward.fee_amount, outcome.fee_amount);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_contract_logs_reach_receipts_and_bloom() {
    let topic = tachyon_common::crypto::hash(b"transfer-event");
    let emitter = ScriptBuilder::new().emit_log(&topic).build();
    let balances = [(100, FUNDS)];
    let contracts = [(502u64, emitter)];
    let txs = vec![call(100, 502, 0, 0, 30_000)];

    let outcome = processor(4)
        .process(block(1, txs), snapshot_with(&balances, &contracts))
        .await
        .unwrap();

    assert_eq!(outcome.logs.len(), 1);
    assert_eq!(outcome.logs[0].address, addr(502));
    let receipt = &outcome.receipts[0];
    assert!(receipt.bloom.contains(topic.as_bytes()));
    assert!(receipt.bloom.contains(addr(502).as_bytes()));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_contract_creation_receipt_carries_address() {
    let code = ScriptBuilder::new().write_own_slot(&slot(1), &slot(2)).build();
    let txs = vec![deploy(100, 0, code, 200_000)];

    let outcome = processor(4)
        .process(block(1, txs), funded_snapshot(&[(100, FUNDS)]))
        .await
        .unwrap();

    let contract = outcome.receipts[0]
        .contract_address
        .expect("creation receipt has contract address");
    assert_eq!(
        contract,
        tachyon_common::crypto::create_address(&addr(100), 0)
    );
    assert!(outcome.snapshot.account(&contract).unwrap().has_code());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forbidden_sender_rejects_block() {
    let mut cfg = config(4);
    cfg.chain.forbidden_senders.insert(addr(100));
    let processor = tachyon_daemon::core::executor::StateProcessor::new(
        cfg,
        tachyon_daemon::core::engine::NoopEngine,
        std::sync::Arc::new(tachyon_daemon::vm::NativeVm::new()),
    );

    let err = processor
        .process(
            block(1, vec![transfer(100, 101, 1, 0)]),
            funded_snapshot(&[(100, FUNDS)]),
        )
        .await
        .unwrap_err();
    assert_eq!(err, BlockchainError::ForbiddenSender(addr(100)));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_tampered_signature_rejects_block() {
    let mut tx = transfer(100, 101, 1, 0);
    tx.value = 2; // invalidates the sealed digest

    let err = processor(4)
        .process(block(1, vec![tx]), funded_snapshot(&[(100, FUNDS)]))
        .await
        .unwrap_err();
    assert_eq!(err, BlockchainError::InvalidSignature);
}
