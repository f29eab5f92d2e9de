#![allow(dead_code)]

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use tachyon_common::{
    account::Account,
    block::{Block, BlockHeader},
    config::ChainConfig,
    crypto::{Address, Hash},
    transaction::{Message, Transaction},
};
use tachyon_daemon::{
    core::{
        engine::NoopEngine,
        error::VmError,
        executor::{ProcessorConfig, StateProcessor},
        state::{StateImage, StateSnapshot},
    },
    vm::{NativeVm, Vm, VmConfig, VmOutcome},
};

pub const CHAIN_ID: u64 = 1;
pub const GAS_LIMIT: u64 = 10_000_000;
pub const FUNDS: u64 = 1_000_000;

/// RUST_LOG-aware logging for test debugging.
pub fn init_logs() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn addr(i: u64) -> Address {
    Address::from_low_u64(i)
}

pub fn slot(i: u64) -> Hash {
    tachyon_common::crypto::canonical_hash(&("slot", i))
}

/// Snapshot over a fresh image: funded plain accounts plus optional
/// pre-deployed contracts.
pub fn snapshot_with(balances: &[(u64, u64)], contracts: &[(u64, Vec<u8>)]) -> StateSnapshot {
    let mut image = StateImage::with_accounts(
        balances
            .iter()
            .map(|(a, b)| (addr(*a), Account::with_balance(*b))),
    );
    for (a, code) in contracts {
        let account = image.accounts.entry(addr(*a)).or_default();
        account.code = Some(Arc::new(code.clone()));
    }
    StateSnapshot::new(Arc::new(image))
}

pub fn funded_snapshot(balances: &[(u64, u64)]) -> StateSnapshot {
    snapshot_with(balances, &[])
}

pub fn transfer(from: u64, to: u64, value: u64, nonce: u64) -> Transaction {
    call(from, to, value, nonce, 21_000)
}

pub fn call(from: u64, to: u64, value: u64, nonce: u64, gas: u64) -> Transaction {
    Transaction {
        nonce,
        from: addr(from),
        to: Some(addr(to)),
        payment: None,
        value,
        gas,
        gas_price: 1,
        data: Vec::new(),
        auth: Hash::zero(),
    }
    .seal(CHAIN_ID)
}

pub fn deploy(from: u64, nonce: u64, code: Vec<u8>, gas: u64) -> Transaction {
    Transaction {
        nonce,
        from: addr(from),
        to: None,
        payment: None,
        value: 0,
        gas,
        gas_price: 1,
        data: code,
        auth: Hash::zero(),
    }
    .seal(CHAIN_ID)
}

pub fn block(number: u64, transactions: Vec<Transaction>) -> Arc<Block> {
    Arc::new(Block::new(
        BlockHeader::new(number, Hash::zero(), GAS_LIMIT, 1_700_000_000 + number),
        transactions,
    ))
}

pub fn config(cpu_count: usize) -> ProcessorConfig {
    ProcessorConfig {
        chain: ChainConfig {
            chain_id: CHAIN_ID,
            ..Default::default()
        },
        cpu_count,
        ..Default::default()
    }
}

pub fn processor(cpu_count: usize) -> StateProcessor<NoopEngine> {
    StateProcessor::new(config(cpu_count), NoopEngine, Arc::new(NativeVm::new()))
}

pub fn serial_processor() -> StateProcessor<NoopEngine> {
    let mut cfg = config(1);
    cfg.parallel = false;
    StateProcessor::new(cfg, NoopEngine, Arc::new(NativeVm::new()))
}

/// VM wrapper counting `apply` invocations; how the reuse tests observe
/// which transactions actually re-executed.
pub struct CountingVm {
    inner: NativeVm,
    calls: Arc<AtomicUsize>,
}

impl CountingVm {
    pub fn new() -> (Self, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        (
            Self {
                inner: NativeVm::new(),
                calls: calls.clone(),
            },
            calls,
        )
    }
}

impl Vm for CountingVm {
    fn apply(
        &self,
        snapshot: &mut StateSnapshot,
        msg: &Message,
        header: &BlockHeader,
        chain: &ChainConfig,
        config: &VmConfig,
        gas: u64,
    ) -> Result<VmOutcome, VmError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.apply(snapshot, msg, header, chain, config, gas)
    }
}
