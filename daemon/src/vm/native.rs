use tachyon_common::{
    block::BlockHeader,
    config::ChainConfig,
    crypto::{create_address, Address, Hash, ADDRESS_SIZE, HASH_SIZE},
    receipt::Log,
    transaction::Message,
};

use crate::core::{error::VmError, state::StateSnapshot};

use super::{Vm, VmConfig, VmOutcome};

// Script opcodes interpreted for contract accounts. Contract code is a
// flat sequence of fixed-width operations; anything else is malformed.
const OP_READ_ACCOUNT: u8 = 0x01;
const OP_TOUCH_ACCOUNT: u8 = 0x02;
const OP_READ_OWN_SLOT: u8 = 0x03;
const OP_WRITE_OWN_SLOT: u8 = 0x04;
const OP_READ_SLOT: u8 = 0x05;
const OP_WRITE_SLOT: u8 = 0x06;
const OP_EMIT_LOG: u8 = 0x07;
const OP_REVERT: u8 = 0x08;
const OP_BURN_GAS: u8 = 0x09;

/// The built-in VM: plain value transfers, contract creation, and a
/// deterministic script interpreter for contract calls. Rich enough to
/// drive every path of the block executor; heavier VMs plug in behind the
/// same trait.
#[derive(Debug, Default)]
pub struct NativeVm;

impl NativeVm {
    pub fn new() -> Self {
        Self
    }

    fn create(
        &self,
        snapshot: &mut StateSnapshot,
        msg: &Message,
        config: &VmConfig,
        gas: u64,
    ) -> Result<VmOutcome, VmError> {
        let deposit_gas = (msg.data.len() as u64).saturating_mul(config.create_byte_gas);
        if gas < deposit_gas {
            return Err(VmError::OutOfGas {
                limit: gas,
                needed: deposit_gas,
            });
        }

        let address = create_address(&msg.from, msg.nonce);
        snapshot.sub_balance(&msg.from, msg.value)?;
        snapshot.add_balance(&address, msg.value);
        snapshot.set_code(&address, msg.data.clone());

        Ok(VmOutcome {
            used_gas: deposit_gas,
            contract_address: Some(address),
            ..Default::default()
        })
    }

    fn call(
        &self,
        snapshot: &mut StateSnapshot,
        msg: &Message,
        to: Address,
        config: &VmConfig,
        gas: u64,
    ) -> Result<VmOutcome, VmError> {
        let code = snapshot.get_code(&to);
        snapshot.sub_balance(&msg.from, msg.value)?;
        snapshot.add_balance(&to, msg.value);

        let Some(code) = code else {
            return Ok(VmOutcome::default());
        };
        if code.is_empty() {
            return Ok(VmOutcome::default());
        }
        run_script(snapshot, to, &code, config, gas)
    }
}

impl Vm for NativeVm {
    fn apply(
        &self,
        snapshot: &mut StateSnapshot,
        msg: &Message,
        _header: &BlockHeader,
        _chain: &ChainConfig,
        config: &VmConfig,
        gas: u64,
    ) -> Result<VmOutcome, VmError> {
        match msg.to {
            None => self.create(snapshot, msg, config, gas),
            Some(to) => self.call(snapshot, msg, to, config, gas),
        }
    }
}

fn run_script(
    snapshot: &mut StateSnapshot,
    contract: Address,
    code: &[u8],
    config: &VmConfig,
    gas: u64,
) -> Result<VmOutcome, VmError> {
    let mut outcome = VmOutcome::default();
    let mut offset = 0usize;

    while offset < code.len() {
        let op = code[offset];
        let op_offset = offset;
        offset += 1;

        charge(&mut outcome.used_gas, config.op_gas, gas)?;
        match op {
            OP_READ_ACCOUNT => {
                let addr = read_address(code, &mut offset, op_offset)?;
                snapshot.get_balance(&addr);
            }
            OP_TOUCH_ACCOUNT => {
                let addr = read_address(code, &mut offset, op_offset)?;
                snapshot.add_balance(&addr, 0);
            }
            OP_READ_OWN_SLOT => {
                let key = read_hash(code, &mut offset, op_offset)?;
                snapshot.get_state(&contract, &key);
            }
            OP_WRITE_OWN_SLOT => {
                let key = read_hash(code, &mut offset, op_offset)?;
                let value = read_hash(code, &mut offset, op_offset)?;
                snapshot.set_state(&contract, &key, value);
            }
            OP_READ_SLOT => {
                let addr = read_address(code, &mut offset, op_offset)?;
                let key = read_hash(code, &mut offset, op_offset)?;
                snapshot.get_state(&addr, &key);
            }
            OP_WRITE_SLOT => {
                let addr = read_address(code, &mut offset, op_offset)?;
                let key = read_hash(code, &mut offset, op_offset)?;
                let value = read_hash(code, &mut offset, op_offset)?;
                snapshot.set_state(&addr, &key, value);
            }
            OP_EMIT_LOG => {
                let topic = read_hash(code, &mut offset, op_offset)?;
                outcome.logs.push(Log {
                    address: contract,
                    topics: vec![topic],
                    data: Vec::new(),
                });
            }
            OP_REVERT => {
                outcome.failed = true;
                break;
            }
            OP_BURN_GAS => {
                let amount = read_u64(code, &mut offset, op_offset)?;
                charge(&mut outcome.used_gas, amount, gas)?;
            }
            _ => return Err(VmError::MalformedScript(op_offset)),
        }
    }

    Ok(outcome)
}

fn charge(used: &mut u64, amount: u64, gas: u64) -> Result<(), VmError> {
    let next = used.saturating_add(amount);
    if next > gas {
        return Err(VmError::OutOfGas {
            limit: gas,
            needed: next,
        });
    }
    *used = next;
    Ok(())
}

fn read_address(code: &[u8], offset: &mut usize, op_offset: usize) -> Result<Address, VmError> {
    let end = *offset + ADDRESS_SIZE;
    let bytes = code
        .get(*offset..end)
        .ok_or(VmError::MalformedScript(op_offset))?;
    let mut out = [0u8; ADDRESS_SIZE];
    out.copy_from_slice(bytes);
    *offset = end;
    Ok(Address::new(out))
}

fn read_hash(code: &[u8], offset: &mut usize, op_offset: usize) -> Result<Hash, VmError> {
    let end = *offset + HASH_SIZE;
    let bytes = code
        .get(*offset..end)
        .ok_or(VmError::MalformedScript(op_offset))?;
    let mut out = [0u8; HASH_SIZE];
    out.copy_from_slice(bytes);
    *offset = end;
    Ok(Hash::new(out))
}

fn read_u64(code: &[u8], offset: &mut usize, op_offset: usize) -> Result<u64, VmError> {
    let end = *offset + 8;
    let bytes = code
        .get(*offset..end)
        .ok_or(VmError::MalformedScript(op_offset))?;
    let mut out = [0u8; 8];
    out.copy_from_slice(bytes);
    *offset = end;
    Ok(u64::from_be_bytes(out))
}

/// Assembles contract scripts for the native VM.
#[derive(Debug, Clone, Default)]
pub struct ScriptBuilder {
    bytes: Vec<u8>,
}

impl ScriptBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn read_account(mut self, addr: &Address) -> Self {
        self.bytes.push(OP_READ_ACCOUNT);
        self.bytes.extend_from_slice(addr.as_bytes());
        self
    }

    pub fn touch_account(mut self, addr: &Address) -> Self {
        self.bytes.push(OP_TOUCH_ACCOUNT);
        self.bytes.extend_from_slice(addr.as_bytes());
        self
    }

    pub fn read_own_slot(mut self, key: &Hash) -> Self {
        self.bytes.push(OP_READ_OWN_SLOT);
        self.bytes.extend_from_slice(key.as_bytes());
        self
    }

    pub fn write_own_slot(mut self, key: &Hash, value: &Hash) -> Self {
        self.bytes.push(OP_WRITE_OWN_SLOT);
        self.bytes.extend_from_slice(key.as_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self
    }

    pub fn read_slot(mut self, addr: &Address, key: &Hash) -> Self {
        self.bytes.push(OP_READ_SLOT);
        self.bytes.extend_from_slice(addr.as_bytes());
        self.bytes.extend_from_slice(key.as_bytes());
        self
    }

    pub fn write_slot(mut self, addr: &Address, key: &Hash, value: &Hash) -> Self {
        self.bytes.push(OP_WRITE_SLOT);
        self.bytes.extend_from_slice(addr.as_bytes());
        self.bytes.extend_from_slice(key.as_bytes());
        self.bytes.extend_from_slice(value.as_bytes());
        self
    }

    pub fn emit_log(mut self, topic: &Hash) -> Self {
        self.bytes.push(OP_EMIT_LOG);
        self.bytes.extend_from_slice(topic.as_bytes());
        self
    }

    pub fn revert(mut self) -> Self {
        self.bytes.push(OP_REVERT);
        self
    }

    pub fn burn_gas(mut self, amount: u64) -> Self {
        self.bytes.push(OP_BURN_GAS);
        self.bytes.extend_from_slice(&amount.to_be_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use tachyon_common::account::Account;

    use crate::core::state::StateImage;

    use super::*;

    fn addr(i: u64) -> Address {
        Address::from_low_u64(i)
    }

    fn msg(from: u64, to: Option<u64>, value: u64) -> Message {
        Message {
            from: addr(from),
            to: to.map(addr),
            payment: None,
            nonce: 0,
            value,
            gas: 100_000,
            gas_price: 1,
            data: Vec::new(),
        }
    }

    fn snapshot(balances: &[(u64, u64)]) -> StateSnapshot {
        StateSnapshot::new(Arc::new(StateImage::with_accounts(
            balances
                .iter()
                .map(|(a, b)| (addr(*a), Account::with_balance(*b))),
        )))
    }

    fn apply(
        db: &mut StateSnapshot,
        message: &Message,
        gas: u64,
    ) -> Result<VmOutcome, VmError> {
        NativeVm::new().apply(
            db,
            message,
            &BlockHeader::default(),
            &ChainConfig::default(),
            &VmConfig::default(),
            gas,
        )
    }

    #[test]
    fn test_plain_transfer() {
        let mut db = snapshot(&[(100, 50)]);
        let outcome = apply(&mut db, &msg(100, Some(101), 20), 0).unwrap();
        assert_eq!(outcome.used_gas, 0);
        assert!(!outcome.failed);
        assert_eq!(db.get_balance(&addr(100)), 30);
        assert_eq!(db.get_balance(&addr(101)), 20);
    }

    #[test]
    fn test_transfer_insufficient_balance() {
        let mut db = snapshot(&[(100, 5)]);
        let err = apply(&mut db, &msg(100, Some(101), 20), 0).unwrap_err();
        assert!(matches!(err, VmError::InsufficientBalance { .. }));
    }

    #[test]
    fn test_create_stores_code_at_derived_address() {
        let mut db = snapshot(&[(100, 50)]);
        let mut message = msg(100, None, 0);
        message.data = ScriptBuilder::new()
            .write_own_slot(&Hash::zero(), &Hash::max())
            .build();
        let outcome = apply(&mut db, &message, 1_000_000).unwrap();

        let contract = outcome.contract_address.expect("creation yields address");
        assert_eq!(contract, create_address(&addr(100), 0));
        assert!(db.get_code(&contract).is_some());
        assert_eq!(
            outcome.used_gas,
            message.data.len() as u64 * VmConfig::default().create_byte_gas
        );
    }

    #[test]
    fn test_script_writes_foreign_slot_and_logs() {
        let mut db = snapshot(&[(100, 50)]);
        let key = tachyon_common::crypto::hash(b"slot");
        let topic = tachyon_common::crypto::hash(b"topic");
        let code = ScriptBuilder::new()
            .write_slot(&addr(300), &key, &Hash::max())
            .emit_log(&topic)
            .build();
        db.set_code(&addr(200), code);

        let outcome = apply(&mut db, &msg(100, Some(200), 0), 100_000).unwrap();
        assert_eq!(outcome.logs.len(), 1);
        assert_eq!(outcome.logs[0].address, addr(200));
        assert_eq!(db.storage_slot(&addr(300), &key), Some(Hash::max()));
        assert_eq!(outcome.used_gas, 2 * VmConfig::default().op_gas);
    }

    #[test]
    fn test_revert_op_marks_failure_but_keeps_gas() {
        let mut db = snapshot(&[(100, 50)]);
        db.set_code(&addr(200), ScriptBuilder::new().revert().build());
        let outcome = apply(&mut db, &msg(100, Some(200), 0), 100_000).unwrap();
        assert!(outcome.failed);
        assert_eq!(outcome.used_gas, VmConfig::default().op_gas);
    }

    #[test]
    fn test_burn_gas_can_exhaust_budget() {
        let mut db = snapshot(&[(100, 50)]);
        db.set_code(&addr(200), ScriptBuilder::new().burn_gas(1_000_000).build());
        let err = apply(&mut db, &msg(100, Some(200), 0), 10_000).unwrap_err();
        assert!(matches!(err, VmError::OutOfGas { .. }));
    }

    #[test]
    fn test_truncated_script_is_malformed() {
        let mut db = snapshot(&[(100, 50)]);
        db.set_code(&addr(200), vec![OP_READ_ACCOUNT, 0x01, 0x02]);
        let err = apply(&mut db, &msg(100, Some(200), 0), 100_000).unwrap_err();
        assert_eq!(err, VmError::MalformedScript(0));
    }
}
