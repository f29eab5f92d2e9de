use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::crypto::{hash, Hash};

/// World-state record for a single account.
///
/// Contract code is shared behind an `Arc` so snapshot copies stay cheap.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub nonce: u64,
    pub balance: u64,
    pub code: Option<Arc<Vec<u8>>>,
}

impl Account {
    pub fn with_balance(balance: u64) -> Self {
        Self {
            balance,
            ..Default::default()
        }
    }

    /// Empty-object dust: cleared from snapshots at finalize.
    pub fn is_empty(&self) -> bool {
        self.nonce == 0 && self.balance == 0 && self.code.is_none()
    }

    pub fn has_code(&self) -> bool {
        self.code.as_ref().is_some_and(|c| !c.is_empty())
    }

    pub fn code_hash(&self) -> Option<Hash> {
        self.code.as_ref().map(|c| hash(c))
    }
}
