mod apply;
mod associated;
mod conflict;
mod group;
mod grouper;
mod parallel_block;
mod processor;

pub use apply::{apply_transaction_message, intrinsic_gas};
pub use associated::AssociatedAddressCache;
pub use conflict::{ConflictDetector, ConflictReport, ExecutedTx};
pub use group::{append_reuse_entries, ExecutionGroup, GroupError, GroupId, TrxResult, TxInfo};
pub use grouper::Grouper;
pub use parallel_block::{ExecutedBlock, ParallelBlock};
pub use processor::{ProcessOutcome, ProcessorConfig, StateProcessor};
