mod errors;
mod replay;
mod store;
mod txn;

pub use crate::errors::StoreError;
pub use crate::replay::{submit_replayable, ReplayConfig};
pub use crate::store::{RetryPolicy, Store, StoreStats};
pub use crate::txn::{Clock, TickClock, Timestamp, TxnId, TxnIdAllocator, ValueRecord};
