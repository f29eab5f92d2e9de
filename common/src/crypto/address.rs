use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::{
    convert::TryInto,
    fmt::{Display, Error, Formatter},
    str::FromStr,
};

use super::Hash;

pub const ADDRESS_SIZE: usize = 20;

/// Account identifier, the low 20 bytes of the owner key digest.
#[derive(
    Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Debug, Default, Serialize, Deserialize,
)]
pub struct Address([u8; ADDRESS_SIZE]);

impl Address {
    pub const fn new(bytes: [u8; ADDRESS_SIZE]) -> Self {
        Address(bytes)
    }

    pub const fn zero() -> Self {
        Address::new([0; ADDRESS_SIZE])
    }

    /// Address with the given value in its trailing bytes, zeroes elsewhere.
    /// The system/precompile range and test fixtures are built this way.
    pub const fn from_low_u64(value: u64) -> Self {
        let mut bytes = [0u8; ADDRESS_SIZE];
        let be = value.to_be_bytes();
        let mut i = 0;
        while i < 8 {
            bytes[ADDRESS_SIZE - 8 + i] = be[i];
            i += 1;
        }
        Address(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; ADDRESS_SIZE] {
        &self.0
    }

    pub fn to_bytes(self) -> [u8; ADDRESS_SIZE] {
        self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0; ADDRESS_SIZE]
    }
}

impl FromStr for Address {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| "Invalid hex string")?;
        let bytes: [u8; ADDRESS_SIZE] = bytes.try_into().map_err(|_| "Invalid address")?;
        Ok(Address::new(bytes))
    }
}

impl Display for Address {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), Error> {
        write!(f, "{}", self.to_hex())
    }
}

/// Deterministic contract address: trailing 20 bytes of
/// keccak256 over the canonical encoding of (origin, nonce).
pub fn create_address(origin: &Address, nonce: u64) -> Address {
    let encoded = bincode::serialize(&(origin, nonce))
        .expect("canonical types serialize infallibly");
    let digest = Keccak256::digest(&encoded);
    let mut bytes = [0u8; ADDRESS_SIZE];
    bytes.copy_from_slice(&digest[12..]);
    Address::new(bytes)
}

/// Storage slot key inside a contract account.
pub type SlotKey = Hash;
