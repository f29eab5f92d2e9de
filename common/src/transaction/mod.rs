use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::crypto::{canonical_hash, Address, Hash, Hashable};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SignerError {
    #[error("invalid transaction signature")]
    InvalidSignature,
}

/// A signed state-transition request.
///
/// `to == None` requests contract creation. `payment`, when set, names the
/// account that pays the gas fee instead of the sender (fee delegation).
/// `auth` is the authentication tag checked during decode; the concrete
/// signature scheme lives outside the execution engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub nonce: u64,
    pub from: Address,
    pub to: Option<Address>,
    pub payment: Option<Address>,
    pub value: u64,
    pub gas: u64,
    pub gas_price: u64,
    pub data: Vec<u8>,
    pub auth: Hash,
}

impl Transaction {
    /// Digest covered by the authentication tag.
    pub fn signing_digest(&self, chain_id: u64) -> Hash {
        canonical_hash(&(
            chain_id,
            self.nonce,
            &self.from,
            &self.to,
            &self.payment,
            self.value,
            self.gas,
            self.gas_price,
            &self.data,
        ))
    }

    /// Attach a valid authentication tag for `chain_id`.
    pub fn seal(mut self, chain_id: u64) -> Self {
        self.auth = self.signing_digest(chain_id);
        self
    }

    /// Decode into the VM-facing message, verifying the sender on the way.
    pub fn as_message(&self, signer: &dyn Signer) -> Result<Message, SignerError> {
        let from = signer.sender(self)?;
        Ok(Message {
            from,
            to: self.to,
            payment: self.payment,
            nonce: self.nonce,
            value: self.value,
            gas: self.gas,
            gas_price: self.gas_price,
            data: self.data.clone(),
        })
    }

    pub fn is_contract_creation(&self) -> bool {
        self.to.is_none()
    }
}

impl Hashable for Transaction {
    fn hash(&self) -> Hash {
        canonical_hash(self)
    }
}

/// The decoded, signature-checked form of a transaction, derived once
/// during block prepare and handed to the VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub from: Address,
    pub to: Option<Address>,
    pub payment: Option<Address>,
    pub nonce: u64,
    pub value: u64,
    pub gas: u64,
    pub gas_price: u64,
    pub data: Vec<u8>,
}

impl Message {
    /// The account charged for gas: the payment delegate if present,
    /// otherwise the sender.
    pub fn payer(&self) -> Address {
        self.payment.unwrap_or(self.from)
    }
}

/// Sender recovery boundary. The wire signature format is external; the
/// engine only needs "who signed this, if anyone".
pub trait Signer: Send + Sync {
    fn sender(&self, tx: &Transaction) -> Result<Address, SignerError>;
}

/// Default signer: verifies the keyed digest tag for one chain id.
#[derive(Debug, Clone)]
pub struct ChainSigner {
    chain_id: u64,
}

impl ChainSigner {
    pub fn new(chain_id: u64) -> Self {
        Self { chain_id }
    }
}

impl Signer for ChainSigner {
    fn sender(&self, tx: &Transaction) -> Result<Address, SignerError> {
        if tx.auth != tx.signing_digest(self.chain_id) {
            return Err(SignerError::InvalidSignature);
        }
        Ok(tx.from)
    }
}
