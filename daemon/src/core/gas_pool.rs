use super::error::BlockchainError;

/// Tracks the gas still available during the execution of one block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GasPool(u64);

impl GasPool {
    pub fn new(limit: u64) -> Self {
        GasPool(limit)
    }

    pub fn gas(&self) -> u64 {
        self.0
    }

    pub fn add_gas(&mut self, amount: u64) -> &mut Self {
        self.0 = self.0.saturating_add(amount);
        self
    }

    pub fn sub_gas(&mut self, amount: u64) -> Result<(), BlockchainError> {
        if self.0 < amount {
            return Err(BlockchainError::GasLimitReached {
                requested: amount,
                remaining: self.0,
            });
        }
        self.0 -= amount;
        Ok(())
    }
}
