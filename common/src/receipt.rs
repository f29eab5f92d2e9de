use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};
use sha3::{Digest, Keccak256};
use std::fmt;

use crate::crypto::{Address, Hash};

pub const BLOOM_SIZE: usize = 256;
const BLOOM_BITS: u16 = 2048;

/// 2048-bit log filter over log addresses and topics.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Bloom([u8; BLOOM_SIZE]);

impl Bloom {
    pub const fn empty() -> Self {
        Bloom([0; BLOOM_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; BLOOM_SIZE] {
        &self.0
    }

    /// Set the three filter bits derived from the keccak digest of `input`.
    pub fn add(&mut self, input: &[u8]) {
        let digest = Keccak256::digest(input);
        for pair in 0..3 {
            let bit = ((digest[pair * 2] as u16) << 8 | digest[pair * 2 + 1] as u16)
                % BLOOM_BITS;
            self.0[BLOOM_SIZE - 1 - (bit / 8) as usize] |= 1 << (bit % 8);
        }
    }

    pub fn contains(&self, input: &[u8]) -> bool {
        let digest = Keccak256::digest(input);
        (0..3).all(|pair| {
            let bit = ((digest[pair * 2] as u16) << 8 | digest[pair * 2 + 1] as u16)
                % BLOOM_BITS;
            self.0[BLOOM_SIZE - 1 - (bit / 8) as usize] & (1 << (bit % 8)) != 0
        })
    }

    pub fn accrue_log(&mut self, log: &Log) {
        self.add(log.address.as_bytes());
        for topic in &log.topics {
            self.add(topic.as_bytes());
        }
    }

    pub fn is_empty(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl Default for Bloom {
    fn default() -> Self {
        Bloom::empty()
    }
}

impl fmt::Debug for Bloom {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Bloom({})", hex::encode(self.0))
    }
}

impl Serialize for Bloom {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(self.0))
    }
}

impl<'de> Deserialize<'de> for Bloom {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        let bytes = hex::decode(&s).map_err(SerdeError::custom)?;
        let bytes: [u8; BLOOM_SIZE] = bytes
            .try_into()
            .map_err(|_| SerdeError::custom("invalid bloom length"))?;
        Ok(Bloom(bytes))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
    pub address: Address,
    pub topics: Vec<Hash>,
    pub data: Vec<u8>,
}

pub fn logs_bloom(logs: &[Log]) -> Bloom {
    let mut bloom = Bloom::empty();
    for log in logs {
        bloom.accrue_log(log);
    }
    bloom
}

/// Execution result of a single transaction, bit-exact for consumers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub status: u64,
    pub cumulative_gas_used: u64,
    pub bloom: Bloom,
    pub logs: Vec<Log>,
    pub tx_hash: Hash,
    pub contract_address: Option<Address>,
    pub gas_used: u64,
    pub block_hash: Hash,
    pub block_number: u64,
    pub transaction_index: u64,
}

pub const RECEIPT_STATUS_SUCCESS: u64 = 1;
pub const RECEIPT_STATUS_FAILED: u64 = 0;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bloom_membership() {
        let mut bloom = Bloom::empty();
        assert!(bloom.is_empty());
        bloom.add(b"hello");
        assert!(bloom.contains(b"hello"));
        assert!(!bloom.contains(b"absent-topic"));
    }

    #[test]
    fn test_logs_bloom_covers_address_and_topics() {
        let log = Log {
            address: Address::from_low_u64(55),
            topics: vec![crate::crypto::hash(b"topic-0")],
            data: vec![1, 2, 3],
        };
        let bloom = logs_bloom(std::slice::from_ref(&log));
        assert!(bloom.contains(log.address.as_bytes()));
        assert!(bloom.contains(log.topics[0].as_bytes()));
    }

    #[test]
    fn test_bloom_serde_roundtrip() {
        let mut bloom = Bloom::empty();
        bloom.add(b"entry");
        let json = serde_json::to_string(&bloom).unwrap();
        let back: Bloom = serde_json::from_str(&json).unwrap();
        assert_eq!(bloom, back);
    }
}
