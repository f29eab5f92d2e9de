mod snapshot;
mod touched;

pub use snapshot::{ReuseEntry, StateImage, StateObjectUpdate, StateSnapshot};
pub use touched::TouchedAddressSet;
